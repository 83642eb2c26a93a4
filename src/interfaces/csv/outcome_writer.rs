use crate::application::ledger::Settlement;
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

#[derive(Debug, Serialize)]
struct OutcomeRecord<'a> {
    reference: &'a str,
    outcome: &'a str,
}

/// Writes one `reference,outcome` row per processed settlement event.
pub struct OutcomeWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> OutcomeWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write(&mut self, reference: &str, settlement: &Settlement) -> Result<()> {
        self.write_label(reference, settlement.label())
    }

    /// Rows the ledger refused (e.g. an operator reporting `pending`).
    pub fn write_label(&mut self, reference: &str, outcome: &str) -> Result<()> {
        self.writer.serialize(OutcomeRecord { reference, outcome })?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writes_header_and_rows() {
        let mut buffer = Vec::new();
        {
            let mut writer = OutcomeWriter::new(&mut buffer);
            writer.write("R1", &Settlement::UnknownReference).unwrap();
            writer.write_label("R2", "rejected").unwrap();
            writer.flush().unwrap();
        }
        let output = String::from_utf8(buffer).unwrap();
        assert_eq!(output, "reference,outcome\nR1,unknown_reference\nR2,rejected\n");
    }
}
