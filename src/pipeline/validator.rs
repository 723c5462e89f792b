//! Envelope validator: is this envelope addressed to us?
//!
//! Checks run in a fixed order and stop at the first mismatch, so an envelope
//! with both a foreign type and a foreign source is always reported as a type
//! mismatch. Comparison is exact: no case folding, trimming, or wildcards.

use crate::envelope::Envelope;
use crate::pipeline::types::{ExpectedIdentity, MismatchField, Rejection};

/// One ordered equality check between an envelope attribute and its expectation.
struct Check {
    field: MismatchField,
    expected: fn(&ExpectedIdentity) -> &str,
    actual: fn(&Envelope) -> &str,
}

const CHECKS: [Check; 2] = [
    Check {
        field: MismatchField::TypeMismatch,
        expected: expected_type,
        actual: Envelope::event_type,
    },
    Check {
        field: MismatchField::SourceMismatch,
        expected: expected_source,
        actual: Envelope::source,
    },
];

fn expected_type(expected: &ExpectedIdentity) -> &str {
    &expected.event_type
}

fn expected_source(expected: &ExpectedIdentity) -> &str {
    &expected.source
}

/// Validate an envelope against the expected identity.
pub fn validate(envelope: &Envelope, expected: &ExpectedIdentity) -> Result<(), Rejection> {
    for check in &CHECKS {
        let want = (check.expected)(expected);
        let got = (check.actual)(envelope);
        if want != got {
            return Err(Rejection::new(check.field, want, got));
        }
    }
    Ok(())
}
