use crate::replicator::{
    status::{PolicyAncestorStatus, RewriteMessage, RewriteNamespace},
    ResourceConfig,
};
use kube::core::GroupVersionKind;

const GATEWAY_GROUP: &str = "gateway.networking.k8s.io";

/// Kinds whose status is copied, with namespace mentions rewritten.
const ROUTE_KINDS: &[(&str, &str)] = &[
    ("v1", "Gateway"),
    ("v1", "HTTPRoute"),
    ("v1", "GRPCRoute"),
    ("v1alpha2", "TLSRoute"),
    ("v1alpha2", "TCPRoute"),
];

/// Returns the resources replicated by default.
pub(crate) fn builtin(controller_name: &str) -> Vec<ResourceConfig> {
    let mut resources = ROUTE_KINDS
        .iter()
        .map(|(version, kind)| {
            ResourceConfig::new(
                GroupVersionKind::gvk(GATEWAY_GROUP, version, kind),
                controller_name,
            )
            .with_condition_handler(RewriteNamespace)
        })
        .collect::<Vec<_>>();

    resources.push(
        ResourceConfig::new(
            GroupVersionKind::gvk(GATEWAY_GROUP, "v1alpha3", "BackendTLSPolicy"),
            controller_name,
        )
        .with_transform(PolicyAncestorStatus)
        .with_condition_handler(RewriteMessage {
            condition_type: None,
            reason: None,
            contains: "downstream attachment target missing".to_string(),
            message: "referenced resource not found in upstream namespace".to_string(),
        })
        .with_condition_handler(RewriteNamespace),
    );

    resources
}
