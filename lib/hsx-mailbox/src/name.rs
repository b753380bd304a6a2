// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Mailbox name grammar: `<prefix>:<name>[@<owner_pid>]` (spec §4.3).

use abi::mailbox::Namespace;
use abi::Pid;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum NameError {
    InvalidOwner,
}

/// A resolved mailbox target: namespace, bare name, and owning PID (`None`
/// for the process-global APP/SHARED namespaces).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Target {
    pub namespace: Namespace,
    pub name: String,
    pub owner: Option<Pid>,
}

/// Resolves a mailbox name string against the caller's PID, per the
/// resolution rules in spec §4.3.
pub fn resolve(raw: &str, caller: Pid) -> Result<Target, NameError> {
    let (body, owner_override) = match raw.rsplit_once('@') {
        Some((b, pid_str)) => {
            let pid: Pid = pid_str.parse().map_err(|_| NameError::InvalidOwner)?;
            (b, Some(pid))
        }
        None => (raw, None),
    };

    let (prefix, rest) = match body.split_once(':') {
        Some((p, r)) => (Some(p), r),
        None => (None, body),
    };

    Ok(match prefix {
        Some("pid") => Target {
            namespace: Namespace::Pid,
            name: rest.to_string(),
            owner: Some(owner_override.unwrap_or(caller)),
        },
        Some("svc") => Target {
            namespace: Namespace::Svc,
            name: rest.to_string(),
            owner: Some(owner_override.unwrap_or(caller)),
        },
        Some("app") => Target {
            namespace: Namespace::App,
            name: rest.to_string(),
            owner: owner_override,
        },
        Some("shared") => Target {
            namespace: Namespace::Shared,
            name: rest.to_string(),
            owner: None,
        },
        _ => Target {
            // Bare names (no recognized prefix) default to SVC, caller-owned.
            namespace: Namespace::Svc,
            name: body.to_string(),
            owner: Some(owner_override.unwrap_or(caller)),
        },
    })
}
