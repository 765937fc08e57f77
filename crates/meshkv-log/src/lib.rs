//! Background-thread `log::Log` implementation used by the `meshkv` binary.
//! Library crates in the workspace never call [`MeshLogger::init`] themselves
//! — only the binary that owns the process installs a logger.
//!
//! Every record is tagged with the node id the logger was built for, so logs
//! from several nodes sharing one terminal (as in local multi-node testing)
//! stay attributable without grepping for the bind port.

use chrono::Local;
use log::{set_boxed_logger, set_max_level, Level, Log, SetLoggerError};
use std::io::{stdout, BufWriter, Write};
use std::sync::mpsc;
use std::thread;

pub enum LogCommand {
    Record(String),
    Flush,
    Terminate,
}

pub struct MeshLogger {
    node_tag: Option<String>,
    max_level: Level,
    sender: mpsc::SyncSender<LogCommand>,
}

impl MeshLogger {
    pub fn new(
        node_tag: Option<String>,
        max_level: Level,
        buffer_size: usize,
    ) -> (Self, mpsc::Receiver<LogCommand>) {
        let (sender, receiver) = mpsc::sync_channel(buffer_size);
        (
            MeshLogger {
                node_tag,
                max_level,
                sender,
            },
            receiver,
        )
    }

    /// Spawns the writer thread and installs `self` as the global logger.
    /// `node_tag`, if given, is prefixed onto every record the way the
    /// source's node logs itself (`[node_id] message`).
    pub fn init(
        node_tag: impl Into<Option<String>>,
        max_level: Level,
        buffer_size: usize,
    ) -> Result<(), SetLoggerError> {
        let (logger, receiver) = MeshLogger::new(node_tag.into(), max_level, buffer_size);

        thread::Builder::new()
            .name("meshkv-log-writer".into())
            .spawn(move || {
                let mut writer = BufWriter::new(stdout());
                while let Ok(command) = receiver.recv() {
                    match command {
                        LogCommand::Record(message) => {
                            if let Err(e) = writer.write_all(message.as_bytes()) {
                                eprintln!("[meshkv-log] failed to write log record: {e}");
                            }
                        }
                        LogCommand::Flush => {
                            if let Err(e) = writer.flush() {
                                eprintln!("[meshkv-log] failed to flush log: {e}");
                            }
                        }
                        LogCommand::Terminate => {
                            let _ = writer.flush();
                            break;
                        }
                    }
                }
                let _ = writer.flush();
            })
            .expect("failed to spawn log writer thread");

        set_boxed_logger(Box::new(logger))?;
        set_max_level(max_level.to_level_filter());
        Ok(())
    }
}

impl Log for MeshLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &log::Record) {
        if self.enabled(record.metadata()) {
            let now = Local::now();
            let message = match &self.node_tag {
                Some(tag) => format!(
                    "{} {} [{}] [{tag}] {}\n",
                    now.format("%Y-%m-%d %H:%M:%S%.3f"),
                    record.level(),
                    record.target(),
                    record.args()
                ),
                None => format!(
                    "{} {} [{}] {}\n",
                    now.format("%Y-%m-%d %H:%M:%S%.3f"),
                    record.level(),
                    record.target(),
                    record.args()
                ),
            };

            if let Err(e) = self.sender.try_send(LogCommand::Record(message)) {
                eprintln!("[meshkv-log] failed to send log message: {e}");
            }
        }
    }

    fn flush(&self) {
        let _ = self.sender.send(LogCommand::Flush);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn record_with_tag_is_prefixed() {
        let (logger, receiver) = MeshLogger::new(Some("node-1".into()), Level::Info, 8);
        let record = log::Record::builder()
            .args(format_args!("hello"))
            .level(Level::Info)
            .target("meshkv")
            .build();
        logger.log(&record);
        match receiver.recv_timeout(Duration::from_secs(1)).unwrap() {
            LogCommand::Record(line) => {
                assert!(line.contains("[node-1]"));
                assert!(line.contains("hello"));
            }
            _ => panic!("expected a record"),
        }
    }

    #[test]
    fn record_without_tag_has_no_bracketed_node_id() {
        let (logger, receiver) = MeshLogger::new(None, Level::Info, 8);
        let record = log::Record::builder()
            .args(format_args!("hello"))
            .level(Level::Info)
            .target("meshkv")
            .build();
        logger.log(&record);
        match receiver.recv_timeout(Duration::from_secs(1)).unwrap() {
            LogCommand::Record(line) => assert_eq!(line.matches('[').count(), 1),
            _ => panic!("expected a record"),
        }
    }

    #[test]
    fn disabled_level_is_not_sent() {
        let (logger, receiver) = MeshLogger::new(None, Level::Warn, 8);
        let record = log::Record::builder()
            .args(format_args!("noisy"))
            .level(Level::Debug)
            .target("meshkv")
            .build();
        logger.log(&record);
        assert!(receiver.recv_timeout(Duration::from_millis(50)).is_err());
    }
}
