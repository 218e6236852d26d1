use crate::{
    k8s::{object, DynamicObject, GroupVersionKind, ResourceExt},
    replicator::{
        ownership, EnqueueRequestForUpstreamOwner, Error, Replicator, Request, ResourceConfig,
    },
};
use futures::prelude::*;
use kube::{
    runtime::{
        controller::{self, Action},
        reflector::ObjectRef,
        watcher, Controller,
    },
    Api,
};
use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tracing::{debug, warn};

const BACKOFF_BASE: Duration = Duration::from_secs(5);
const BACKOFF_MAX: Duration = Duration::from_secs(5 * 60);

/// Reconciles one resource kind from one upstream cluster.
pub(crate) struct ReplicationController {
    replicator: Replicator,
    resource: ResourceConfig,
    cluster: String,
    failures: Mutex<HashMap<Request, u32>>,
}

// === impl ReplicationController ===

impl ReplicationController {
    pub(crate) fn new(replicator: Replicator, resource: ResourceConfig, cluster: String) -> Self {
        Self {
            replicator,
            resource,
            cluster,
            failures: Mutex::default(),
        }
    }

    /// Runs until shutdown, reconciling upstream objects that match
    /// `selector` and every upstream object whose downstream mirror changes.
    pub(crate) async fn run(
        self,
        upstream: kube::Client,
        downstream: kube::Client,
        handler: EnqueueRequestForUpstreamOwner,
        selector: String,
    ) {
        let ar = self.resource.api_resource.clone();
        let upstream_api = Api::<DynamicObject>::all_with(upstream, &ar);
        let downstream_api = Api::<DynamicObject>::all_with(downstream, &ar);

        let mut upstream_watch = watcher::Config::default();
        if !selector.is_empty() {
            upstream_watch = upstream_watch.labels(&selector);
        }
        let downstream_watch = watcher::Config::default().labels(&format!(
            "{}={},{}={}",
            ownership::UPSTREAM_GROUP,
            self.resource.gvk.group,
            ownership::UPSTREAM_KIND,
            self.resource.gvk.kind,
        ));

        let cluster = self.cluster.clone();
        let owner_ar = ar.clone();
        let mapper = move |obj: DynamicObject| {
            let mut requests = Vec::new();
            handler.generic(&obj, &mut requests);
            requests
                .into_iter()
                .filter(|r| r.cluster == cluster)
                .map(|r| ObjectRef::new_with(&r.name, owner_ar.clone()).within(&r.namespace))
                .collect::<Vec<_>>()
        };

        let ctx = Arc::new(self);
        Controller::new_with(upstream_api, upstream_watch, ar.clone())
            .watches_with(downstream_api, ar, downstream_watch, mapper)
            .shutdown_on_signal()
            .run(reconcile, error_policy, ctx.clone())
            .for_each(|res| {
                match res {
                    Ok((obj, _)) => debug!(object = %obj, "Reconciled"),
                    // Objects deleted while failing are never reconciled again.
                    Err(controller::Error::ObjectNotFound(obj)) => {
                        ctx.forget(&Request::new(
                            ctx.cluster.clone(),
                            obj.namespace.unwrap_or_default(),
                            obj.name,
                        ));
                        debug!("Object deleted before it was reconciled");
                    }
                    Err(error) => debug!(%error, "Controller error"),
                }
                future::ready(())
            })
            .await
    }

    /// Counts a failed reconcile, returning the number of consecutive
    /// failures.
    fn record_failure(&self, req: &Request) -> u32 {
        let mut failures = self.failures.lock();
        let count = failures.entry(req.clone()).or_default();
        *count += 1;
        *count
    }

    fn forget(&self, req: &Request) {
        self.failures.lock().remove(req);
    }

    fn request(&self, obj: &DynamicObject) -> Request {
        Request::new(
            self.cluster.clone(),
            obj.namespace().unwrap_or_default(),
            obj.name_any(),
        )
    }

    fn gvk(&self) -> &GroupVersionKind {
        &self.resource.gvk
    }
}

async fn reconcile(
    obj: Arc<DynamicObject>,
    ctx: Arc<ReplicationController>,
) -> Result<Action, Error> {
    let req = ctx.request(&obj);
    let requeue = ctx.replicator.reconcile(ctx.gvk(), &req).await?;
    ctx.forget(&req);
    Ok(requeue.map_or_else(Action::await_change, Action::requeue))
}

fn error_policy(obj: Arc<DynamicObject>, error: &Error, ctx: Arc<ReplicationController>) -> Action {
    let req = ctx.request(&obj);
    let failures = ctx.record_failure(&req);
    let delay = backoff(failures);
    warn!(
        kind = %object::gvk_key(ctx.gvk()),
        request = %req,
        %error,
        failures,
        ?delay,
        "Reconcile failed"
    );
    Action::requeue(delay)
}

/// Doubles the delay for each consecutive failure, up to a maximum.
fn backoff(failures: u32) -> Duration {
    let exp = failures.saturating_sub(1).min(16);
    BACKOFF_BASE
        .checked_mul(1 << exp)
        .map_or(BACKOFF_MAX, |d| d.min(BACKOFF_MAX))
}
