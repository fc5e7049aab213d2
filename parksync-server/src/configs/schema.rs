use crate::models::Table;
use crate::models::command_queue::CommandQueueTable;
use crate::models::dead_letter::DeadLetterTable;
use crate::models::device_affinity::DeviceAffinityTable;
use crate::models::display_policy::DisplayPolicyTable;
use crate::models::rate_bucket::RateBucketTable;
use crate::models::verification::VerificationTable;
use crate::models::verified_hash::VerifiedHashTable;

pub struct SchemaManager {
    tables: Vec<Box<dyn Table>>,
}

impl SchemaManager {
    pub fn new(tables: Vec<Box<dyn Table>>) -> Self {
        let manager = Self { tables };
        manager.assert_dependencies_resolved();
        manager
    }

    /// Tables here carry no foreign keys; ordering only has to respect the
    /// declared dependencies, which stays a plain stable pass.
    fn assert_dependencies_resolved(&self) {
        for (index, table) in self.tables.iter().enumerate() {
            for dep in table.dependencies() {
                let resolved = self.tables[..index].iter().any(|t| t.name() == dep);
                assert!(
                    resolved,
                    "table {} depends on {} which is not created before it",
                    table.name(),
                    dep
                );
            }
        }
    }

    pub fn create_schema(&self) -> Vec<String> {
        self.tables.iter().map(|table| table.create()).collect()
    }

    pub fn dispose_schema(&self) -> Vec<String> {
        self.tables.iter().rev().map(|table| table.dispose()).collect()
    }
}

impl Default for SchemaManager {
    fn default() -> Self {
        SchemaManager::new(vec![
            Box::new(DisplayPolicyTable),
            Box::new(CommandQueueTable),
            Box::new(DeadLetterTable),
            Box::new(RateBucketTable),
            Box::new(DeviceAffinityTable),
            Box::new(VerificationTable),
            Box::new(VerifiedHashTable),
        ])
    }
}
