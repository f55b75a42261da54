//! Deployment → `Snapshot`. Pure; no I/O.

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use smallvec::SmallVec;
use uptrack_core::{Condition, EntityKey, InvalidObject, ResourceFigures, ResourceUsage, Snapshot};

use crate::quantity::{bytes, cpu_millicores};
use crate::PodUsage;

pub fn entity_key(d: &Deployment) -> Result<EntityKey, InvalidObject> {
    let meta = &d.metadata;
    let name = meta.name.as_deref().filter(|s| !s.is_empty()).ok_or(InvalidObject::MissingField("name"))?;
    let namespace = meta.namespace.as_deref().filter(|s| !s.is_empty()).ok_or(InvalidObject::MissingField("namespace"))?;
    Ok(EntityKey::new(namespace, name))
}

/// Build the snapshot for one observation.
///
/// Resource figures are present only when `pods` is given, usage only when `usage` is given too.
pub fn evaluate(d: &Deployment, pods: Option<&[Pod]>, usage: Option<&[PodUsage]>) -> Result<(EntityKey, Snapshot), InvalidObject> {
    let key = entity_key(d)?;
    let status = d.status.as_ref();
    let conditions: SmallVec<[Condition; 4]> = status
        .and_then(|s| s.conditions.as_ref())
        .map(|cs| cs.iter().map(|c| Condition::new(c.type_.clone(), c.status.clone())).collect())
        .unwrap_or_default();

    let snap = Snapshot {
        desired_replicas: d.spec.as_ref().and_then(|s| s.replicas),
        ready_replicas: status.and_then(|s| s.ready_replicas).unwrap_or(0),
        available_replicas: status.and_then(|s| s.available_replicas).unwrap_or(0),
        unavailable_replicas: status.and_then(|s| s.unavailable_replicas).unwrap_or(0),
        updated_replicas: status.and_then(|s| s.updated_replicas).unwrap_or(0),
        created_at: d.metadata.creation_timestamp.as_ref().map(|t| t.0),
        generation: d.metadata.generation.unwrap_or(0),
        observed_generation: status.and_then(|s| s.observed_generation).unwrap_or(0),
        conditions,
        resources: pods.map(|p| aggregate(p, usage)),
    };
    Ok((key, snap))
}

fn aggregate(pods: &[Pod], usage: Option<&[PodUsage]>) -> ResourceFigures {
    let mut fig = ResourceFigures::default();
    let containers = pods.iter().filter_map(|p| p.spec.as_ref()).flat_map(|s| s.containers.iter());
    for c in containers {
        let Some(res) = c.resources.as_ref() else { continue };
        if let Some(req) = res.requests.as_ref() {
            fig.cpu_request_millicores += req.get("cpu").and_then(cpu_millicores).filter(|v| *v > 0.0).unwrap_or(0.0);
            fig.memory_request_bytes += req.get("memory").and_then(bytes).filter(|v| *v > 0.0).unwrap_or(0.0);
        }
        if let Some(lim) = res.limits.as_ref() {
            fig.cpu_limit_millicores += lim.get("cpu").and_then(cpu_millicores).filter(|v| *v > 0.0).unwrap_or(0.0);
            fig.memory_limit_bytes += lim.get("memory").and_then(bytes).filter(|v| *v > 0.0).unwrap_or(0.0);
        }
    }
    fig.usage = usage.map(|pms| {
        let mut u = ResourceUsage::default();
        for c in pms.iter().flat_map(|pm| pm.containers.iter()) {
            u.cpu_millicores += c.usage.get("cpu").and_then(cpu_millicores).unwrap_or(0.0);
            u.memory_bytes += c.usage.get("memory").and_then(bytes).unwrap_or(0.0);
        }
        u
    });
    fig
}

/// Render a label selector in the API's query form (`app=web,tier in (a,b),!legacy`).
///
/// Returns `None` for an empty selector (it would match every pod) or an unknown operator.
pub fn format_selector(sel: &LabelSelector) -> Option<String> {
    let mut reqs: Vec<(&str, String)> = Vec::new();
    if let Some(labels) = sel.match_labels.as_ref() {
        for (k, v) in labels {
            reqs.push((k.as_str(), format!("{}={}", k, v)));
        }
    }
    for e in sel.match_expressions.iter().flatten() {
        let mut values = e.values.clone().unwrap_or_default();
        values.sort();
        let rendered = match e.operator.as_str() {
            "In" => format!("{} in ({})", e.key, values.join(",")),
            "NotIn" => format!("{} notin ({})", e.key, values.join(",")),
            "Exists" => e.key.clone(),
            "DoesNotExist" => format!("!{}", e.key),
            _ => return None,
        };
        reqs.push((e.key.as_str(), rendered));
    }
    if reqs.is_empty() {
        return None;
    }
    reqs.sort_by(|a, b| a.0.cmp(b.0));
    Some(reqs.into_iter().map(|(_, r)| r).collect::<Vec<_>>().join(","))
}
