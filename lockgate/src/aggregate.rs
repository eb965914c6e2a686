//! Combine per-requirement results into one access decision.
//!
//! Pure: no I/O, no shared state. Callers pass a snapshot of the results.

use crate::types::{FulfillmentPolicy, RequirementResult, RequirementStatus, VerificationVerdict};

/// Aggregate `results` under `policy`.
///
/// - `All`: authorized iff every result is satisfied. An empty set is
///   vacuously authorized.
/// - `Any`: authorized iff at least one result is satisfied. An empty set
///   is never authorized.
///
/// `missing_requirements` keeps input order.
pub fn aggregate(results: &[RequirementResult], policy: FulfillmentPolicy) -> VerificationVerdict {
    let is_authorized = match policy {
        FulfillmentPolicy::All => results.iter().all(RequirementResult::is_satisfied),
        FulfillmentPolicy::Any => results.iter().any(RequirementResult::is_satisfied),
    };

    let missing_requirements = results
        .iter()
        .filter(|r| !r.is_satisfied())
        .map(missing_message)
        .collect();

    let errors = results
        .iter()
        .filter(|r| r.status == RequirementStatus::Failed && r.is_error())
        .filter_map(|r| r.error_message.clone())
        .collect();

    let is_final = is_authorized || results.iter().all(RequirementResult::is_terminal);

    VerificationVerdict {
        is_authorized,
        missing_requirements,
        errors,
        is_final,
    }
}

fn missing_message(result: &RequirementResult) -> String {
    match result.status {
        RequirementStatus::Pending | RequirementStatus::InProgress => {
            format!("{}: still verifying", result.display_name)
        }
        RequirementStatus::Failed => result
            .error_message
            .clone()
            .unwrap_or_else(|| format!("{}: not met", result.display_name)),
        RequirementStatus::Satisfied => String::new(),
    }
}
