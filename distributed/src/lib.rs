pub mod coordinator;
pub mod ledger;
pub mod logging;
pub mod partition;
pub mod store;
pub mod worker;

pub use logging::init_logger;

pub mod service {
    use std::fmt::Display;

    tonic::include_proto!("service");

    impl Display for MapTaskReply {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(
                f,
                "MapTaskReply:{{ signal: {:?}, task: {}, file: {:?} }}",
                self.signal(),
                self.task_id,
                self.file_name
            )
        }
    }

    impl Display for ReduceTaskReply {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(
                f,
                "ReduceTaskReply:{{ signal: {:?}, task: {}, partition: {} }}",
                self.signal(),
                self.task_id,
                self.partition_number
            )
        }
    }

    impl From<crate::ledger::TaskKind> for TaskType {
        fn from(kind: crate::ledger::TaskKind) -> Self {
            match kind {
                crate::ledger::TaskKind::Map => TaskType::Map,
                crate::ledger::TaskKind::Reduce => TaskType::Reduce,
            }
        }
    }

    impl From<TaskType> for crate::ledger::TaskKind {
        fn from(ty: TaskType) -> Self {
            match ty {
                TaskType::Map => crate::ledger::TaskKind::Map,
                TaskType::Reduce => crate::ledger::TaskKind::Reduce,
            }
        }
    }
}

pub const ADDR: &str = "[::1]:56789";
