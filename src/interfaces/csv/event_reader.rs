use crate::domain::transaction::TransactionStatus;
use crate::error::{PaymentError, Result};
use serde::Deserialize;
use std::io::Read;

/// One row of a provider settlement report.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SettlementEvent {
    pub reference: String,
    pub status: TransactionStatus,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub provider_ref: Option<String>,
}

fn empty_as_none<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|v| !v.trim().is_empty()))
}

/// Reads settlement events from a CSV source.
///
/// Wraps `csv::Reader` with whitespace trimming and flexible record lengths,
/// so a report without the trailing `provider_ref` column still parses.
pub struct EventReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> EventReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily deserializes rows; a bad row yields an `Err` and the rest still stream.
    pub fn events(self) -> impl Iterator<Item = Result<SettlementEvent>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(PaymentError::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_valid_stream() {
        let data = "reference, status, provider_ref\n\
                    ngn_gateway_deposit_1_abc, completed, 991\n\
                    xaf_gateway_payout_2_def, failed,";
        let results: Vec<Result<SettlementEvent>> =
            EventReader::new(data.as_bytes()).events().collect();

        assert_eq!(results.len(), 2);
        let first = results[0].as_ref().unwrap();
        assert_eq!(first.status, TransactionStatus::Completed);
        assert_eq!(first.provider_ref.as_deref(), Some("991"));
        let second = results[1].as_ref().unwrap();
        assert_eq!(second.status, TransactionStatus::Failed);
        assert_eq!(second.provider_ref, None);
    }

    #[test]
    fn test_reader_malformed_line() {
        let data = "reference, status, provider_ref\nR1, settled, x\nR2, completed, y";
        let results: Vec<Result<SettlementEvent>> =
            EventReader::new(data.as_bytes()).events().collect();

        assert!(results[0].is_err());
        assert!(results[1].is_ok());
    }
}
