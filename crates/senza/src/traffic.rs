//! weighted traffic switching between stack versions
//!
//! Every stack version owns one weighted DNS record. Routing a percentage
//! to one version rescales all other weights proportionally so the total
//! stays at exactly 100; rounding uses largest remainders, never plain
//! truncation, so no percent point is lost or invented.

use crate::cloud::{with_retries, ExternalServiceError};

const READ_ATTEMPTS: usize = 3;

const FULL_PERCENTAGE: u32 = 100;

/// One weighted record of a record set, identified by stack version
#[derive(Debug, Clone, PartialEq, Eq, derive_new::new)]
pub struct WeightedRecord {
    pub version: String,
    pub weight: u32,
}

/// Access to the weighted record set of one domain
///
/// `set_weights` replaces all weights in one logical change; it is a
/// mutation and must not be retried by callers.
pub trait RecordSetClient {
    fn get_records(&self, domain: &str) -> Result<Vec<WeightedRecord>, ExternalServiceError>;

    fn set_weights(
        &self,
        domain: &str,
        records: &[WeightedRecord],
    ) -> Result<(), ExternalServiceError>;
}

/// Compute new weights routing `percentage` percent to `version`
///
/// The other records share the remainder proportionally to their current
/// weights; if none of them carries traffic the remainder is split evenly.
/// A record set with a single record always ends up at 100.
pub fn redistribute(
    records: &[WeightedRecord],
    version: &str,
    percentage: u32,
) -> Result<Vec<WeightedRecord>, TrafficError> {
    if percentage > FULL_PERCENTAGE {
        return Err(TrafficError::InvalidPercentage { percentage });
    }
    if records.is_empty() {
        return Err(TrafficError::EmptyRecordSet);
    }
    let target = records
        .iter()
        .position(|record| record.version == version)
        .ok_or_else(|| TrafficError::UnknownVersion {
            version: version.to_string(),
        })?;

    if records.len() == 1 {
        return Ok(vec![WeightedRecord::new(
            records[target].version.clone(),
            FULL_PERCENTAGE,
        )]);
    }

    let remainder = FULL_PERCENTAGE - percentage;
    let others: Vec<usize> = (0..records.len()).filter(|index| *index != target).collect();
    let total: u64 = others.iter().map(|index| records[*index].weight as u64).sum();

    // exact share per record as (floor, fractional remainder)
    let shares: Vec<(u32, u64)> = others
        .iter()
        .map(|index| {
            if total == 0 {
                let count = others.len() as u64;
                ((remainder as u64 / count) as u32, 0)
            } else {
                let exact = remainder as u64 * records[*index].weight as u64;
                ((exact / total) as u32, exact % total)
            }
        })
        .collect();

    let mut weights: Vec<u32> = records.iter().map(|record| record.weight).collect();
    weights[target] = percentage;
    for (&index, &(floor, _)) in others.iter().zip(&shares) {
        weights[index] = floor;
    }

    // hand out the lost percent points, largest fractional part first
    let distributed: u32 = shares.iter().map(|(floor, _)| floor).sum();
    let mut leftover = remainder - distributed;
    let mut by_remainder: Vec<(usize, u64)> = others
        .iter()
        .zip(&shares)
        .map(|(&index, &(_, fraction))| (index, fraction))
        .collect();
    // with equal fractions (even split included) earlier records fill first
    by_remainder.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    for (index, _) in by_remainder {
        if leftover == 0 {
            break;
        }
        weights[index] += 1;
        leftover -= 1;
    }

    Ok(records
        .iter()
        .zip(weights)
        .map(|(record, weight)| WeightedRecord::new(record.version.clone(), weight))
        .collect())
}

/// Read the record set, redistribute and write the new weights back
pub fn change_traffic(
    client: &dyn RecordSetClient,
    domain: &str,
    version: &str,
    percentage: u32,
) -> Result<Vec<WeightedRecord>, TrafficError> {
    let records = with_retries(READ_ATTEMPTS, || client.get_records(domain))?;
    let updated = redistribute(&records, version, percentage)?;
    tracing::info!(domain, version, percentage, "changing traffic weights");
    client.set_weights(domain, &updated)?;
    Ok(updated)
}

#[derive(thiserror::Error, Debug)]
pub enum TrafficError {
    #[error("percentage {percentage} is out of range, must be 0..=100")]
    InvalidPercentage { percentage: u32 },

    #[error("version {version:?} has no weighted record")]
    UnknownVersion { version: String },

    #[error("record set is empty")]
    EmptyRecordSet,

    #[error("record set access failed")]
    External(#[from] ExternalServiceError),
}
