//! Deterministic names for generated policy objects.
//!
//! Names take the form
//! `{app}-{namespace}-policy-{source app}-{source namespace}-{target}-{digest}`, where the
//! digest is a prefix of the SHA-256 of the policy's canonical form. Any change to the
//! policy produces a new name, so a stale object is orphaned and later removed instead of
//! being mutated in place.

use crate::MeshPolicy;
use sha2::{Digest, Sha256};
use std::fmt::Write;

/// Kubernetes' limit on object names.
pub const MAX_NAME_LEN: usize = 253;

/// Maximum length of each variable segment when a name must be shortened.
const SEGMENT_LEN: usize = 30;

/// Maximum length of the requesting application and namespace segments when a name must be
/// shortened. Namespaces are DNS labels, so this never truncates a real namespace.
const REQUESTER_LEN: usize = 63;

const DIGEST_LEN: usize = 8;

const POLICY_MARKER: &str = "policy";

/// Used in place of a target name when a policy selects its target by labels.
const CUSTOM_SELECTOR: &str = "custom-selector";

/// Generates the name of the object implementing `policy` on behalf of the application
/// `app_name` in `namespace`.
pub fn policy_name(app_name: &str, namespace: &str, policy: &MeshPolicy) -> String {
    // The target namespace is omitted since it is the namespace the object is created in.
    let target = policy
        .target_app_name()
        .or(policy.target_service())
        .unwrap_or(CUSTOM_SELECTOR);
    let digest = digest(policy);

    let name = join(
        app_name,
        namespace,
        policy.source_app_name(),
        policy.source_namespace(),
        target,
        &digest,
    );
    if name.len() <= MAX_NAME_LEN {
        return name;
    }

    let name = join(
        app_name,
        namespace,
        truncate(policy.source_app_name(), SEGMENT_LEN),
        truncate(policy.source_namespace(), SEGMENT_LEN),
        truncate(target, SEGMENT_LEN),
        &digest,
    );
    if name.len() <= MAX_NAME_LEN {
        return name;
    }

    join(
        truncate(app_name, REQUESTER_LEN),
        truncate(namespace, REQUESTER_LEN),
        truncate(policy.source_app_name(), SEGMENT_LEN),
        truncate(policy.source_namespace(), SEGMENT_LEN),
        truncate(target, SEGMENT_LEN),
        &digest,
    )
}

fn join(
    app_name: &str,
    namespace: &str,
    source_app: &str,
    source_namespace: &str,
    target: &str,
    digest: &str,
) -> String {
    [
        app_name,
        namespace,
        POLICY_MARKER,
        source_app,
        source_namespace,
        target,
        digest,
    ]
    .join("-")
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Returns the leading hex characters of the SHA-256 of the policy's canonical form.
fn digest(policy: &MeshPolicy) -> String {
    let hash = Sha256::digest(canonical(policy).as_bytes());
    let mut hex = hex::encode(hash);
    hex.truncate(DIGEST_LEN);
    hex
}

/// Renders every field of the policy in a fixed order.
fn canonical(policy: &MeshPolicy) -> String {
    let fields = policy.fields();
    let mut out = String::new();
    let _ = write!(
        out,
        "source_namespace={:?} source_app_name={:?} target_namespace={:?} \
         target_app_name={:?} target_selector_labels={:?} target_service={:?} \
         target_type={:?} endpoints=[",
        fields.source_namespace,
        fields.source_app_name,
        fields.target_namespace,
        fields.target_app_name,
        fields.target_selector_labels,
        fields.target_service,
        fields.target_type,
    );
    for ep in &fields.endpoints {
        let _ = write!(
            out,
            "{{hosts={:?} ports={:?} methods={:?} paths={:?}}}",
            ep.hosts,
            ep.ports,
            ep.methods
                .as_ref()
                .map(|ms| ms.iter().map(|m| m.as_str()).collect::<Vec<_>>()),
            ep.paths,
        );
    }
    out.push(']');
    out
}
