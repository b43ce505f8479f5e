use crate::state::{OperationMode, OperationStatus};
use crate::tool::ToolExit;
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Milestones of a plugin operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperationEvent {
    Started {
        operation_id: Uuid,
        mode: OperationMode,
        plugins: Vec<String>,
    },
    CacheCleared {
        operation_id: Uuid,
        exit_code: i32,
    },
    ToolStarted {
        operation_id: Uuid,
        packages: Vec<String>,
    },
    ToolFinished {
        operation_id: Uuid,
        #[serde(serialize_with = "exit_label")]
        exit: ToolExit,
    },
    Completed {
        operation_id: Uuid,
        status: OperationStatus,
    },
    Aborted {
        operation_id: Uuid,
        error: String,
    },
    Activated {
        plugin_id: String,
    },
    Updated {
        plugin_id: String,
    },
}

fn exit_label<S: serde::Serializer>(exit: &ToolExit, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(exit)
}

pub fn log_event(event: &OperationEvent) {
    match event {
        OperationEvent::Started {
            operation_id,
            mode,
            plugins,
        } => {
            info!(
                operation_id = %operation_id,
                mode = ?mode,
                "Operation started for {}", plugins.join(", ")
            );
        }
        OperationEvent::CacheCleared {
            operation_id,
            exit_code,
        } => {
            if *exit_code == 0 {
                debug!(operation_id = %operation_id, "Cache cleared");
            } else {
                error!(operation_id = %operation_id, exit_code = exit_code, "Cache clear failed");
            }
        }
        OperationEvent::ToolStarted {
            operation_id,
            packages,
        } => {
            info!(
                operation_id = %operation_id,
                "Dependency tool started: {}", packages.join(" ")
            );
        }
        OperationEvent::ToolFinished { operation_id, exit } => {
            if exit.success() {
                info!(operation_id = %operation_id, "Dependency tool finished: {}", exit);
            } else {
                warn!(operation_id = %operation_id, "Dependency tool finished: {}", exit);
            }
        }
        OperationEvent::Completed {
            operation_id,
            status,
        } => {
            info!(operation_id = %operation_id, status = %status, "Operation completed");
        }
        OperationEvent::Aborted {
            operation_id,
            error,
        } => {
            error!(operation_id = %operation_id, "Operation aborted: {}", error);
        }
        OperationEvent::Activated { plugin_id } => {
            info!(plugin_id = %plugin_id, "Plugin activated");
        }
        OperationEvent::Updated { plugin_id } => {
            info!(plugin_id = %plugin_id, "Plugin updated");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};

    /// Collects formatted log output in memory.
    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Captured {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn capture(events: &[OperationEvent]) -> String {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_target(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        tracing::subscriber::with_default(subscriber, || events.iter().for_each(log_event));
        captured.contents()
    }

    #[test]
    fn test_log_every_event() {
        let operation_id = Uuid::new_v4();

        let output = capture(&[
            OperationEvent::Started {
                operation_id,
                mode: OperationMode::InstallOrUpdate,
                plugins: vec!["board".into(), "page".into()],
            },
            OperationEvent::CacheCleared {
                operation_id,
                exit_code: 1,
            },
            OperationEvent::ToolFinished {
                operation_id,
                exit: ToolExit::Exited(2),
            },
            OperationEvent::Aborted {
                operation_id,
                error: "boom".into(),
            },
            OperationEvent::Activated {
                plugin_id: "board".into(),
            },
        ]);

        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 5);
        assert!(lines[0].contains("INFO"));
        assert!(lines[0].contains("Operation started for board, page"));
        assert!(lines[0].contains(&format!("operation_id={}", operation_id)));
        assert!(lines[1].contains("ERROR"));
        assert!(lines[1].contains("Cache clear failed"));
        assert!(lines[1].contains("exit_code=1"));
        assert!(lines[2].contains("WARN"));
        assert!(lines[2].contains("Dependency tool finished: exit code 2"));
        assert!(lines[3].contains("Operation aborted: boom"));
        assert!(lines[4].contains("Plugin activated"));
        assert!(lines[4].contains("plugin_id=board"));
    }

    #[test]
    fn test_successful_cache_clear_is_debug_only() {
        let operation_id = Uuid::new_v4();
        let event = OperationEvent::CacheCleared {
            operation_id,
            exit_code: 0,
        };

        let output = capture(std::slice::from_ref(&event));
        assert!(output.contains("DEBUG"));
        assert!(output.contains("Cache cleared"));
        assert!(!output.contains("failed"));
    }

    #[test]
    fn test_serialized_shape() {
        let event = OperationEvent::ToolFinished {
            operation_id: Uuid::nil(),
            exit: ToolExit::Exited(1),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "tool_finished");
        assert_eq!(value["exit"], "exit code 1");
    }
}
