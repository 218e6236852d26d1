use crate::{
    error::Context,
    handler::Request,
    metrics::{ReplicatorMetrics, WriteOp},
    ownership::{self, UpstreamOwner},
    status::StatusContext,
    strategy::{DownstreamObjectMeta, OwnerRefOptions, Placement, ResourceStrategy},
    Error, ReplicationConfig, ResourceConfig, Result,
};
use netsvc_operator_k8s_api::{
    object, Client, Clusters, DynamicObject, GroupVersionKind, ResourceExt, ResultExt, TypeMeta,
};
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, instrument};

/// Mirrors upstream objects into the downstream store and their downstream
/// status back upstream.
///
/// Every reconcile re-reads the upstream and downstream objects and only
/// writes what differs, so reconciles of the same key may be repeated or
/// interrupted at any point.
#[derive(Clone)]
pub struct Replicator {
    config: Arc<ReplicationConfig>,
    clusters: Arc<dyn Clusters>,
    downstream: Arc<dyn Client>,
    placement: Placement,
    metrics: ReplicatorMetrics,
}

/// The state of a single reconcile.
struct Reconcile<'a> {
    config: &'a ReplicationConfig,
    resource: &'a ResourceConfig,
    upstream: Arc<dyn Client>,
    strategy: Box<dyn ResourceStrategy>,
    metrics: &'a ReplicatorMetrics,
}

// === impl Replicator ===

impl Replicator {
    pub fn new(
        config: Arc<ReplicationConfig>,
        clusters: Arc<dyn Clusters>,
        downstream: Arc<dyn Client>,
        placement: Placement,
    ) -> Self {
        Self {
            config,
            clusters,
            downstream,
            placement,
            metrics: ReplicatorMetrics::default(),
        }
    }

    pub fn with_metrics(mut self, metrics: ReplicatorMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    /// Reconciles the upstream object identified by `req`.
    ///
    /// Returns the delay after which the object should be reconciled again,
    /// if any. Errors are meant to be retried with backoff.
    #[instrument(skip_all, fields(
        kind = %gvk.kind,
        cluster = %req.cluster,
        namespace = %req.namespace,
        name = %req.name,
    ))]
    pub async fn reconcile(
        &self,
        gvk: &GroupVersionKind,
        req: &Request,
    ) -> Result<Option<Duration>> {
        let resource = self
            .config
            .resource(gvk)
            .ok_or_else(|| Error::UnknownKind(object::gvk_key(gvk)))?;
        let upstream = self
            .clusters
            .cluster(&req.cluster)
            .ok_or_else(|| Error::UnknownCluster(req.cluster.clone()))?;
        let reconcile = Reconcile {
            config: &self.config,
            resource,
            strategy: self
                .placement
                .strategy(&req.cluster, upstream.clone(), self.downstream.clone()),
            upstream,
            metrics: &self.metrics,
        };

        let result = reconcile.run(req).await;
        self.metrics
            .reconciled(&gvk.kind, &req.cluster, result.is_ok());
        result
    }
}

impl std::fmt::Debug for Replicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Replicator")
            .field("config", &self.config)
            .field("clusters", &self.clusters.names())
            .field("placement", &self.placement)
            .finish()
    }
}

// === impl Reconcile ===

impl Reconcile<'_> {
    async fn run(&self, req: &Request) -> Result<Option<Duration>> {
        let ar = &self.resource.api_resource;
        let Some(mut obj) = self
            .upstream
            .get(ar, Some(&req.namespace), &req.name)
            .await
            .with_context(|| format!("get upstream {} {req}", ar.kind))?
        else {
            debug!("Upstream object not found");
            return Ok(None);
        };
        if obj.types.is_none() {
            obj.types = Some(TypeMeta {
                api_version: ar.api_version.clone(),
                kind: ar.kind.clone(),
            });
        }

        // With the same-namespace placement, replicas live beside their
        // owners and may match the same selector.
        if UpstreamOwner::from_labels(obj.labels()).is_some() {
            debug!("Skipping replica");
            return Ok(None);
        }

        let finalizer = self.config.finalizer();
        if object::is_terminating(&obj) {
            if object::has_finalizer(&obj, finalizer) {
                self.finalize(obj).await?;
            }
            return Ok(None);
        }

        // The finalizer must be persisted before anything is written
        // downstream.
        if object::add_finalizer(&mut obj, finalizer) {
            self.upstream
                .update(ar, &obj)
                .await
                .with_context(|| format!("add finalizer to upstream {} {req}", ar.kind))?;
            info!(%finalizer, "Added finalizer");
            return Ok(None);
        }

        let downstream = self.replicate(&obj).await?;
        self.sync_status(&obj, &downstream).await?;
        Ok(None)
    }

    /// Creates or updates the downstream object from the upstream object,
    /// returning the downstream object as stored.
    async fn replicate(&self, upstream: &DynamicObject) -> Result<DynamicObject> {
        let ar = &self.resource.api_resource;
        let client = self.strategy.client();
        let DownstreamObjectMeta { namespace, name } =
            self.strategy.object_meta_from_upstream_object(upstream).await?;

        let current = client
            .get(ar, Some(&namespace), &name)
            .await
            .with_context(|| format!("get downstream {} {namespace}/{name}", ar.kind))?;

        let mut desired = match &current {
            Some(current) => current.clone(),
            None => DynamicObject::new(&name, ar).within(&namespace),
        };
        object::copy_content(upstream, &mut desired);

        let labels = upstream
            .labels()
            .iter()
            .filter(|(k, _)| !ownership::is_reserved(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect::<std::collections::BTreeMap<_, _>>();
        desired.metadata.labels = (!labels.is_empty()).then_some(labels);

        let annotations = upstream
            .annotations()
            .iter()
            .filter(|(k, _)| self.config.replicates_annotation(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect::<Vec<_>>();
        if !annotations.is_empty() {
            desired.annotations_mut().extend(annotations);
        }

        self.strategy
            .set_controller_reference(upstream, &mut desired, OwnerRefOptions::default())
            .await?;

        let kind = &ar.kind;
        match current {
            None => {
                let created = client
                    .create(ar, &desired)
                    .await
                    .with_context(|| format!("create downstream {kind} {namespace}/{name}"))?;
                self.metrics.downstream_write(kind, WriteOp::Create);
                info!(downstream.namespace = %namespace, downstream.name = %name, "Created downstream object");
                Ok(created)
            }
            Some(current) if object::same(&current, &desired) => {
                debug!(downstream.namespace = %namespace, downstream.name = %name, "Downstream object up to date");
                Ok(current)
            }
            Some(_) => {
                let updated = client
                    .update(ar, &desired)
                    .await
                    .with_context(|| format!("update downstream {kind} {namespace}/{name}"))?;
                self.metrics.downstream_write(kind, WriteOp::Update);
                info!(downstream.namespace = %namespace, downstream.name = %name, "Updated downstream object");
                Ok(updated)
            }
        }
    }

    /// Writes the transformed downstream status to the upstream object if it
    /// differs from the upstream status.
    async fn sync_status(&self, upstream: &DynamicObject, downstream: &DynamicObject) -> Result<()> {
        let Some(downstream_status) = object::status(downstream) else {
            debug!("Downstream object has no status yet");
            return Ok(());
        };

        let upstream_namespace = upstream.namespace().unwrap_or_default();
        let downstream_namespace = downstream.namespace().unwrap_or_default();
        let ctx = StatusContext {
            upstream_namespace: &upstream_namespace,
            downstream_namespace: &downstream_namespace,
            controller_name: &self.resource.controller_name,
            condition_handlers: &self.resource.condition_handlers,
        };
        let status = self.resource.transform.transform(&ctx, downstream_status)?;
        if object::status(upstream) == Some(&status) {
            debug!("Upstream status up to date");
            return Ok(());
        }

        let ar = &self.resource.api_resource;
        let mut updated = upstream.clone();
        object::set_status(&mut updated, status);
        self.upstream
            .update_status(ar, &updated)
            .await
            .with_context(|| {
                format!(
                    "update status of upstream {} {upstream_namespace}/{}",
                    ar.kind,
                    upstream.name_any()
                )
            })?;
        self.metrics.status_updated(&ar.kind);
        info!("Updated upstream status");
        Ok(())
    }

    /// Tears down downstream state for a terminating upstream object, then
    /// releases it by removing the finalizer.
    async fn finalize(&self, mut upstream: DynamicObject) -> Result<()> {
        let ar = &self.resource.api_resource;
        match self.strategy.object_meta_from_upstream_object(&upstream).await {
            Ok(DownstreamObjectMeta { namespace, name }) => {
                let deleted = self
                    .strategy
                    .client()
                    .delete(ar, Some(&namespace), &name)
                    .await
                    .ignore_not_found()
                    .with_context(|| format!("delete downstream {} {namespace}/{name}", ar.kind))?;
                if deleted.is_some() {
                    self.metrics.downstream_write(&ar.kind, WriteOp::Delete);
                    info!(downstream.namespace = %namespace, downstream.name = %name, "Deleted downstream object");
                }
            }
            // The upstream namespace is gone, and the downstream object's
            // location with it. Its anchor cannot be found either.
            Err(error) if error.is_not_found() => {
                debug!(%error, "Downstream object cannot be located");
            }
            Err(error) => return Err(error),
        }

        self.strategy.delete_anchor_for_object(&upstream).await?;

        let finalizer = self.config.finalizer();
        if object::remove_finalizer(&mut upstream, finalizer) {
            self.upstream
                .update(ar, &upstream)
                .await
                .ignore_not_found()
                .with_context(|| {
                    format!(
                        "remove finalizer from upstream {} {}",
                        ar.kind,
                        upstream.name_any()
                    )
                })?;
            info!(%finalizer, "Removed finalizer");
        }
        Ok(())
    }
}
