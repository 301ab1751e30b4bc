use std::sync::Arc;

use axum::{
    extract::{Path, Query},
    Extension, Json,
};
use axum_macros::debug_handler;
use resources::objects::{metrics::ExternalMetricValueList, SCALED_OBJECT_NAME_LABEL};
use serde::Deserialize;

use crate::{
    response::{ErrResponse, HandlerResult},
    AppState,
};

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(rename = "labelSelector")]
    pub label_selector: Option<String>,
}

/// `GET /apis/external.metrics.k8s.io/v1beta1/namespaces/:namespace/:metric`
///
/// The native autoscaler names the owning target through the standard
/// selector label; the sample values come from the operator over RPC.
#[debug_handler]
pub async fn get_external_metric(
    Extension(state): Extension<Arc<AppState>>,
    Path((namespace, metric_name)): Path<(String, String)>,
    query: Query<ListQuery>,
) -> HandlerResult<ExternalMetricValueList> {
    let selector = query.label_selector.as_deref().unwrap_or("");
    let target_name = target_from_selector(selector).ok_or_else(|| {
        ErrResponse::bad_request(format!(
            "labelSelector must carry {}=<target>",
            SCALED_OBJECT_NAME_LABEL
        ))
    })?;

    let values = state
        .provider
        .get_metrics(&namespace, &target_name, &metric_name)
        .await?;
    if values.is_empty() {
        return Err(ErrResponse::not_found(format!(
            "no value for metric {} of {}/{}",
            metric_name, namespace, target_name
        )));
    }
    Ok(Json(ExternalMetricValueList::new(values)))
}

pub async fn healthz() -> &'static str {
    "ok"
}

/// Extracts the target name from a `k1=v1,k2=v2` selector string.
fn target_from_selector(selector: &str) -> Option<String> {
    selector.split(',').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        if key.trim() == SCALED_OBJECT_NAME_LABEL && !value.trim().is_empty() {
            Some(value.trim().to_string())
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_extracts_the_target_name() {
        assert_eq!(
            target_from_selector("scaledobject.rkeda.io/name=worker"),
            Some("worker".to_string())
        );
        assert_eq!(
            target_from_selector("app=x,scaledobject.rkeda.io/name=worker"),
            Some("worker".to_string())
        );
        assert_eq!(target_from_selector("app=x"), None);
        assert_eq!(target_from_selector(""), None);
        assert_eq!(target_from_selector("scaledobject.rkeda.io/name="), None);
    }
}
