use serde_json::Value;
use tokio::io::{self, AsyncWrite, AsyncWriteExt};

use crate::backfill_error;
use crate::destination::Destination;
use crate::error::{BackfillResult, ErrorKind};
use crate::types::Delivery;

/// Destination writing each delivery as one JSON line to stdout.
///
/// With `show_data` disabled only keys and positions are printed, which is useful to follow a
/// backfill without dumping table contents into the logs.
#[derive(Debug, Clone, Copy)]
pub struct StdoutDestination {
    show_data: bool,
}

impl StdoutDestination {
    pub fn new(show_data: bool) -> Self {
        Self { show_data }
    }

    fn render(&self, delivery: &Delivery) -> BackfillResult<Value> {
        let mut value = serde_json::to_value(delivery)?;

        if !self.show_data
            && let Value::Object(object) = &mut value
        {
            match delivery {
                Delivery::Row { .. } => {
                    if let Some(Value::Object(row)) = object.get_mut("row") {
                        row.remove("row");
                    }
                }
                Delivery::Change(_) => {
                    object.remove("row");
                }
            }
        }

        Ok(value)
    }

    /// Writes one line per delivery, then flushes `writer`.
    async fn write_batch<W>(&self, writer: &mut W, batch: &[Delivery]) -> BackfillResult<()>
    where
        W: AsyncWrite + Unpin,
    {
        let mut buffer = Vec::new();
        for delivery in batch {
            buffer.extend_from_slice(self.render(delivery)?.to_string().as_bytes());
            buffer.push(b'\n');
        }

        writer.write_all(&buffer).await.map_err(|err| {
            backfill_error!(
                ErrorKind::DestinationPushFailed,
                "Writing to stdout failed",
                err
            )
        })?;

        writer.flush().await.map_err(|err| {
            backfill_error!(
                ErrorKind::DestinationPushFailed,
                "Flushing stdout failed",
                err
            )
        })?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl Destination for StdoutDestination {
    fn name(&self) -> &'static str {
        "stdout"
    }

    async fn push(&self, batch: Vec<Delivery>) -> BackfillResult<()> {
        self.write_batch(&mut io::stdout(), &batch).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        Cell, ChangeEvent, ChangeKind, ChunkId, LogPosition, MergedRow, PrimaryKey, RowOrigin,
        TableName, TableRow,
    };
    use serde_json::json;

    fn merged() -> Delivery {
        Delivery::Row {
            table: TableName::from("users"),
            chunk_id: ChunkId(2),
            row: MergedRow {
                key: PrimaryKey::from(7i64),
                row: TableRow::new(vec![Cell::from("secret")]),
                origin: RowOrigin::Snapshot,
            },
        }
    }

    fn change() -> Delivery {
        Delivery::Change(ChangeEvent {
            table: TableName::from("users"),
            key: PrimaryKey::from(8i64),
            row: Some(TableRow::new(vec![Cell::from("secret")])),
            position: LogPosition(11),
            kind: ChangeKind::Insert,
        })
    }

    fn line(destination: &StdoutDestination, delivery: &Delivery) -> Value {
        destination.render(delivery).unwrap()
    }

    #[test]
    fn show_data_controls_row_values() {
        let visible = line(&StdoutDestination::new(true), &merged());
        assert_eq!(visible["row"]["row"]["values"][0], json!("secret"));
        assert_eq!(visible["chunk_id"], json!(2));

        let hidden = line(&StdoutDestination::new(false), &merged());
        assert!(hidden["row"].get("row").is_none());
        assert_eq!(hidden["row"]["key"], json!([7]));

        let hidden = line(&StdoutDestination::new(false), &change());
        assert!(hidden.get("row").is_none());
        assert_eq!(hidden["position"], json!(11));
        assert_eq!(hidden["kind"], json!("insert"));
    }

    #[tokio::test]
    async fn batch_is_written_as_json_lines() {
        let destination = StdoutDestination::new(false);
        let mut output = Vec::new();

        destination
            .write_batch(&mut output, &[merged(), change()])
            .await
            .unwrap();

        let output = String::from_utf8(output).unwrap();
        let lines: Vec<Value> = output
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["row"]["key"], json!([7]));
        assert_eq!(lines[1]["position"], json!(11));
        assert!(!output.contains("secret"));
    }
}
