use super::command::CommandDescriptor;
use super::protocol::{CommandArg, now_ms};
use itertools::Itertools;
use serde::Serialize;
use std::io::Write;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub sequence: u64,
    pub label: Option<String>,
    pub issued_at_ms: u64,
    pub descriptor: Arc<CommandDescriptor>,
}

/// Append-only journal of mutating commands, in issue order.
#[derive(Debug, Default)]
pub struct History {
    entries: Vec<HistoryEntry>,
    next_sequence: u64,
    skip_tracking: bool,
    task_label: Option<String>,
}

#[derive(Serialize)]
struct CsvRow<'a> {
    sequence: u64,
    issued_at_ms: u64,
    label: &'a str,
    command: &'a str,
    return_shape: String,
    args: String,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `descriptor` unless tracking is currently skipped. Returns the
    /// sequence number assigned to the entry.
    pub fn add_entry(&mut self, descriptor: Arc<CommandDescriptor>) -> Option<u64> {
        if self.skip_tracking {
            return None;
        }
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.entries.push(HistoryEntry {
            sequence,
            label: self.task_label.clone(),
            issued_at_ms: now_ms(),
            descriptor,
        });
        Some(sequence)
    }

    /// While set, new entries are silently dropped.
    pub fn set_skip_tracking(&mut self, skip: bool) {
        self.skip_tracking = skip;
    }

    pub fn is_skipping(&self) -> bool {
        self.skip_tracking
    }

    /// Label stamped onto subsequent entries, e.g. the name of a user task.
    pub fn set_task_label(&mut self, label: Option<String>) {
        self.task_label = label;
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Writes the full ordered journal as CSV. Binary arguments are recorded
    /// by length only.
    pub fn export_csv<W: Write>(&self, writer: W) -> Result<(), csv::Error> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        for entry in &self.entries {
            let args = entry
                .descriptor
                .args
                .iter()
                .map(|arg| match arg {
                    CommandArg::Value(v) => v.to_string(),
                    CommandArg::Bytes(b) => format!("<{} bytes>", b.len()),
                })
                .join(" ");
            csv_writer.serialize(CsvRow {
                sequence: entry.sequence,
                issued_at_ms: entry.issued_at_ms,
                label: entry.label.as_deref().unwrap_or(""),
                command: &entry.descriptor.command,
                return_shape: format!("{:?}", entry.descriptor.return_shape),
                args,
            })?;
        }
        csv_writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::protocol::ReturnShape;

    fn descriptor(name: &str) -> Arc<CommandDescriptor> {
        Arc::new(CommandDescriptor::new(name, ReturnShape::Status).changes_molecules())
    }

    #[test]
    fn entries_keep_insertion_order_and_sequence() {
        let mut history = History::new();
        history.add_entry(descriptor("a"));
        history.add_entry(descriptor("b"));

        let names: Vec<_> = history.iter().map(|e| e.descriptor.command.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(history.entries()[1].sequence, 1);
    }

    #[test]
    fn skip_tracking_drops_entries() {
        let mut history = History::new();
        history.set_skip_tracking(true);
        assert_eq!(history.add_entry(descriptor("hidden")), None);
        history.set_skip_tracking(false);
        assert_eq!(history.add_entry(descriptor("shown")), Some(0));
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn task_label_is_stamped_on_new_entries() {
        let mut history = History::new();
        history.add_entry(descriptor("before"));
        history.set_task_label(Some("Sharpen map".to_string()));
        history.add_entry(descriptor("during"));

        assert_eq!(history.entries()[0].label, None);
        assert_eq!(history.entries()[1].label.as_deref(), Some("Sharpen map"));
    }

    #[test]
    fn export_csv_writes_header_and_rows() {
        let mut history = History::new();
        history.add_entry(Arc::new(
            CommandDescriptor::new("read_ccp4_map", ReturnShape::Int)
                .bytes(vec![0; 16])
                .arg("map.ccp4")
                .changes_molecules(),
        ));

        let mut out = Vec::new();
        history.export_csv(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("sequence,issued_at_ms,label,command,return_shape,args")
        );
        let row = lines.next().unwrap();
        assert!(row.contains("read_ccp4_map"));
        assert!(row.contains("<16 bytes>"));
    }

    #[test]
    fn export_csv_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.csv");
        let mut history = History::new();
        history.add_entry(descriptor("close_molecule"));

        history
            .export_csv(std::fs::File::create(&path).unwrap())
            .unwrap();

        let content = std::fs::read_to_string(path).unwrap();
        assert_eq!(content.lines().count(), 2);
    }
}
