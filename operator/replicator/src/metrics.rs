use prometheus_client::{
    encoding::{EncodeLabelSet, EncodeLabelValue},
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};

#[derive(Clone, Debug, Default)]
pub struct ReplicatorMetrics {
    reconciles: Family<ReconcileLabels, Counter>,
    reconcile_errors: Family<ReconcileLabels, Counter>,
    downstream_writes: Family<WriteLabels, Counter>,
    status_updates: Family<KindLabels, Counter>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ReconcileLabels {
    kind: String,
    cluster: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct WriteLabels {
    kind: String,
    op: WriteOp,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct KindLabels {
    kind: String,
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub(crate) enum WriteOp {
    Create,
    Update,
    Delete,
}

impl ReplicatorMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let reconciles = Family::default();
        prom.register(
            "reconciles",
            "Count of reconciles of upstream objects",
            reconciles.clone(),
        );

        let reconcile_errors = Family::default();
        prom.register(
            "reconcile_errors",
            "Count of reconciles that failed",
            reconcile_errors.clone(),
        );

        let downstream_writes = Family::default();
        prom.register(
            "downstream_writes",
            "Count of writes to downstream objects",
            downstream_writes.clone(),
        );

        let status_updates = Family::default();
        prom.register(
            "status_updates",
            "Count of upstream status updates",
            status_updates.clone(),
        );

        Self {
            reconciles,
            reconcile_errors,
            downstream_writes,
            status_updates,
        }
    }

    pub(crate) fn reconciled(&self, kind: &str, cluster: &str, ok: bool) {
        let labels = ReconcileLabels {
            kind: kind.to_string(),
            cluster: cluster.to_string(),
        };
        self.reconciles.get_or_create(&labels).inc();
        if !ok {
            self.reconcile_errors.get_or_create(&labels).inc();
        }
    }

    pub(crate) fn downstream_write(&self, kind: &str, op: WriteOp) {
        self.downstream_writes
            .get_or_create(&WriteLabels {
                kind: kind.to_string(),
                op,
            })
            .inc();
    }

    pub(crate) fn status_updated(&self, kind: &str) {
        self.status_updates
            .get_or_create(&KindLabels {
                kind: kind.to_string(),
            })
            .inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus_client::encoding::text::encode;

    #[test]
    fn encodes_counters() {
        let mut prom = Registry::default();
        let metrics = ReplicatorMetrics::register(prom.sub_registry_with_prefix("replicator"));
        metrics.reconciled("HTTPRoute", "org/project", false);
        metrics.downstream_write("HTTPRoute", WriteOp::Create);
        metrics.status_updated("HTTPRoute");

        let mut text = String::new();
        encode(&mut text, &prom).unwrap();
        assert!(
            text.contains(r#"replicator_reconciles_total{kind="HTTPRoute",cluster="org/project"} 1"#),
            "{text}"
        );
        assert!(
            text.contains(r#"replicator_reconcile_errors_total{kind="HTTPRoute",cluster="org/project"} 1"#),
            "{text}"
        );
        assert!(
            text.contains(r#"replicator_downstream_writes_total{kind="HTTPRoute",op="Create"} 1"#),
            "{text}"
        );
        assert!(
            text.contains(r#"replicator_status_updates_total{kind="HTTPRoute"} 1"#),
            "{text}"
        );
    }
}
