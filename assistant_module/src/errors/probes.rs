//! Ordered probes that dig a structured validation failure out of an opaque
//! error. The first probe that returns `Some` wins.

use std::error::Error;

use serde_json::Value;

use super::RpcError;
use crate::validation::ValidationFailure;

/// A pure lookup from an error to the validation failure hidden inside it.
#[derive(Clone, Copy)]
pub struct ValidationProbe {
    pub name: &'static str,
    pub run: fn(&(dyn Error + 'static)) -> Option<ValidationFailure>,
}

impl std::fmt::Debug for ValidationProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidationProbe")
            .field("name", &self.name)
            .finish()
    }
}

pub fn default_probes() -> Vec<ValidationProbe> {
    vec![
        ValidationProbe {
            name: "direct",
            run: probe_direct,
        },
        ValidationProbe {
            name: "cause_chain",
            run: probe_cause_chain,
        },
        ValidationProbe {
            name: "original",
            run: probe_original,
        },
        ValidationProbe {
            name: "data_issues",
            run: probe_data_issues,
        },
        ValidationProbe {
            name: "nested_data",
            run: probe_nested_data,
        },
        ValidationProbe {
            name: "details_issues",
            run: probe_details_issues,
        },
    ]
}

fn probe_direct(err: &(dyn Error + 'static)) -> Option<ValidationFailure> {
    err.downcast_ref::<ValidationFailure>().cloned()
}

fn probe_cause_chain(err: &(dyn Error + 'static)) -> Option<ValidationFailure> {
    let mut current = err.source();
    while let Some(cause) = current {
        if let Some(failure) = cause.downcast_ref::<ValidationFailure>() {
            return Some(failure.clone());
        }
        if let Some(rpc) = cause.downcast_ref::<RpcError>() {
            if let Some(failure) = rpc_payload_failure(rpc) {
                return Some(failure);
            }
        }
        current = cause.source();
    }
    None
}

fn probe_original(err: &(dyn Error + 'static)) -> Option<ValidationFailure> {
    let original = err.downcast_ref::<RpcError>()?.original.as_ref()?;
    let original: &(dyn Error + 'static) = original.as_ref();
    probe_direct(original).or_else(|| probe_cause_chain(original))
}

fn probe_data_issues(err: &(dyn Error + 'static)) -> Option<ValidationFailure> {
    let data = err.downcast_ref::<RpcError>()?.data.as_ref()?;
    ValidationFailure::from_issues_json(data.get("issues")?)
}

/// Issues one or two levels down in `data` (e.g. `data.zodError.issues`).
fn probe_nested_data(err: &(dyn Error + 'static)) -> Option<ValidationFailure> {
    let data = err.downcast_ref::<RpcError>()?.data.as_ref()?.as_object()?;
    for value in data.values() {
        if let Some(failure) = value.get("issues").and_then(ValidationFailure::from_issues_json) {
            return Some(failure);
        }
        if let Value::Object(inner) = value {
            for nested in inner.values() {
                if let Some(failure) =
                    nested.get("issues").and_then(ValidationFailure::from_issues_json)
                {
                    return Some(failure);
                }
            }
        }
    }
    None
}

fn probe_details_issues(err: &(dyn Error + 'static)) -> Option<ValidationFailure> {
    let details = err.downcast_ref::<RpcError>()?.details.as_ref()?;
    ValidationFailure::from_issues_json(details.get(0)?.get("issues")?)
}

fn rpc_payload_failure(rpc: &RpcError) -> Option<ValidationFailure> {
    rpc.data
        .as_ref()
        .and_then(|data| data.get("issues"))
        .and_then(ValidationFailure::from_issues_json)
}
