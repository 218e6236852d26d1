use crate::{
    controller::ReplicationController,
    k8s::{self, Clusters, KubeClient, Selector, StaticClusters},
    replicator::{
        EnqueueRequestForUpstreamOwner, Placement, ReplicationConfig, Replicator,
        ReplicatorMetrics, ResourceConfig, DEFAULT_FINALIZER,
    },
    resources,
};
use anyhow::{bail, Result};
use clap::Parser;
use kube::{
    api::ApiResource,
    config::{KubeConfigOptions, Kubeconfig},
};
use prometheus_client::registry::Registry;
use std::sync::Arc;
use tracing::{info, info_span, warn, Instrument};

const FIELD_MANAGER: &str = "netsvc-operator";

#[derive(Debug, Parser)]
#[clap(name = "netsvc-operator", about = "Replicates network service resources downstream")]
pub struct Args {
    #[clap(
        long,
        default_value = "netsvc=info,warn",
        env = "NETSVC_OPERATOR_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Name of the cluster the operator runs in, as reported in ownership
    /// labels.
    #[clap(long, default_value = "")]
    cluster_name: String,

    /// Kubeconfig contexts of additional upstream clusters. Each cluster is
    /// named after its context.
    #[clap(long)]
    upstream_context: Vec<String>,

    /// Kubeconfig context of the downstream cluster.
    ///
    /// Defaults to the cluster the operator runs in.
    #[clap(long)]
    downstream_context: Option<String>,

    #[clap(long, default_value = "mapped-namespace")]
    strategy: Placement,

    /// Only upstream objects matching this label selector are replicated.
    #[clap(long, default_value = "")]
    selector: Selector,

    #[clap(long, default_value = DEFAULT_FINALIZER)]
    finalizer: String,

    /// Controller name reported in upstream statuses.
    #[clap(long, default_value = "netsvc.dev/operator")]
    controller_name: String,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            admin,
            client,
            log_level,
            log_format,
            cluster_name,
            upstream_context,
            downstream_context,
            strategy,
            selector,
            finalizer,
            controller_name,
        } = self;

        check_placement(strategy, &upstream_context, downstream_context.as_deref())?;

        let mut prom = <Registry>::default();
        let replicator_metrics =
            ReplicatorMetrics::register(prom.sub_registry_with_prefix("replicator"));
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        // Upstream clusters, keyed by the name reported in ownership labels.
        let mut upstreams = vec![(cluster_name, runtime.client())];
        for context in upstream_context {
            let client = context_client(&context).await?;
            upstreams.push((context, client));
        }
        let downstream = match downstream_context {
            Some(context) => context_client(&context).await?,
            None => runtime.client(),
        };

        // Only replicate kinds that are served by the local cluster, using the
        // resource names it reports.
        let mut config = ReplicationConfig::builder().finalizer(finalizer);
        let mut served = Vec::new();
        for resource in resources::builtin(&controller_name) {
            match discover(&runtime.client(), &resource).await {
                Some(ar) => {
                    let resource = resource.with_api_resource(ar);
                    config = config.resource(resource.clone());
                    served.push(resource);
                }
                None => warn!(
                    kind = %k8s::object::gvk_key(&resource.gvk),
                    "Resource kind not found, skipping replication"
                ),
            }
        }
        let config = Arc::new(config.build());
        info!(?config, %strategy, "Replicating");

        let clusters = upstreams
            .iter()
            .fold(StaticClusters::default(), |clusters, (name, client)| {
                clusters.with(
                    name.clone(),
                    Arc::new(KubeClient::new(client.clone(), FIELD_MANAGER)),
                )
            });
        let clusters: Arc<dyn Clusters> = Arc::new(clusters);
        let replicator = Replicator::new(
            config,
            clusters,
            Arc::new(KubeClient::new(downstream.clone(), FIELD_MANAGER)),
            strategy,
        )
        .with_metrics(replicator_metrics);

        // Spawn one controller per upstream cluster and kind.
        for (cluster, client) in &upstreams {
            for resource in &served {
                let handler = EnqueueRequestForUpstreamOwner::new(&resource.gvk, selector.clone());
                let span = info_span!(
                    "replicate",
                    cluster = %cluster,
                    kind = %resource.api_resource.plural,
                );
                let controller =
                    ReplicationController::new(replicator.clone(), resource.clone(), cluster.clone());
                tokio::spawn(
                    controller
                        .run(
                            client.clone(),
                            downstream.clone(),
                            handler,
                            selector.to_string(),
                        )
                        .instrument(span),
                );
            }
        }

        // Block the main thread on the shutdown signal. Once it fires, wait for the background tasks to
        // complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}

/// Same-namespace replicas are owned natively by their upstream objects, which
/// only resolves when a single cluster is both upstream and downstream.
fn check_placement(
    strategy: Placement,
    upstream_contexts: &[String],
    downstream_context: Option<&str>,
) -> Result<()> {
    if strategy != Placement::SameNamespace {
        return Ok(());
    }
    if let Some(context) = downstream_context {
        bail!(
            "--strategy={strategy} cannot replicate to another cluster (--downstream-context={context})"
        );
    }
    if !upstream_contexts.is_empty() {
        bail!(
            "--strategy={strategy} cannot replicate from other clusters (--upstream-context={})",
            upstream_contexts.join(",")
        );
    }
    Ok(())
}

/// Builds a client for a kubeconfig context.
async fn context_client(context: &str) -> Result<kube::Client> {
    let kubeconfig = Kubeconfig::read()?;
    let options = KubeConfigOptions {
        context: Some(context.to_string()),
        ..Default::default()
    };
    let config = kube::Config::from_custom_kubeconfig(kubeconfig, &options).await?;
    Ok(kube::Client::try_from(config)?)
}

/// Returns the served API resource for a configured kind, if any.
async fn discover(client: &kube::Client, resource: &ResourceConfig) -> Option<ApiResource> {
    let gvk = &resource.gvk;
    let api_version = resource.api_resource.api_version.clone();
    client
        .list_api_group_resources(&api_version)
        .await
        .ok()?
        .resources
        .into_iter()
        .find(|r| r.kind == gvk.kind && !r.name.contains('/'))
        .map(|r| ApiResource {
            group: gvk.group.clone(),
            version: gvk.version.clone(),
            api_version,
            kind: r.kind,
            plural: r.name,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_namespace_placement_is_single_cluster() {
        let contexts = vec!["east".to_string()];
        assert!(check_placement(Placement::SameNamespace, &[], None).is_ok());
        assert!(check_placement(Placement::SameNamespace, &[], Some("data-plane")).is_err());
        assert!(check_placement(Placement::SameNamespace, &contexts, None).is_err());

        assert!(check_placement(Placement::MappedNamespace, &contexts, Some("data-plane")).is_ok());
    }

    #[test]
    fn parses_placement_flags() {
        let args = Args::try_parse_from([
            "netsvc-operator",
            "--strategy=same-namespace",
            "--selector=replicate=true",
        ])
        .unwrap();
        assert_eq!(args.strategy, Placement::SameNamespace);
        assert_eq!(args.selector.to_string(), "replicate=true");
        assert_eq!(args.finalizer, DEFAULT_FINALIZER);
        assert!(args.upstream_context.is_empty());

        assert!(Args::try_parse_from(["netsvc-operator", "--strategy=elsewhere"]).is_err());
    }
}
