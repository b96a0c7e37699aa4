//! Cluster discovery.
//!
//! Agents are configured with globs (`marathon.*`), but supervise concrete
//! clusters. Each glob is grepped once and every distinct cluster base name
//! it matches becomes its own `"<cluster>*"` target.

use std::collections::BTreeSet;

use tracing::{info, warn};

use crate::bridge::RemoteBridge;
use crate::commands;

/// Resolve `globs` into concrete cluster globs, sorted and deduplicated.
///
/// With `literal` set the globs are taken as-is and the portal is not
/// contacted. A glob that cannot be grepped is logged and skipped; callers
/// decide whether an empty result is fatal.
pub async fn discover(bridge: &dyn RemoteBridge, globs: &[String], literal: bool) -> Vec<String> {
    let mut clusters = BTreeSet::new();

    for glob in globs {
        if literal {
            clusters.insert(glob.clone());
            continue;
        }

        match commands::grep(bridge, glob).await {
            Ok(snapshot) => {
                let before = clusters.len();
                clusters.extend(snapshot.cluster_names().into_iter().map(|name| format!("{name}*")));
                info!(%glob, found = clusters.len() - before, "resolved cluster glob");
            }
            Err(e) => {
                warn!(%glob, error = %e, "could not resolve cluster glob");
            }
        }
    }

    clusters.into_iter().collect()
}
