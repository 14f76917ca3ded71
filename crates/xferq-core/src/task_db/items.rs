//! JSON blobs stored alongside collection tasks and results.
//!
//! Items are stored as `{"items":[...]}` and path lists as plain JSON arrays.
//! Two historical encodings exist for an item's `result`: the current named
//! kind (`"COMPLETED"`, `"FAILED_PERMISSION_DENIED"`, ...) and the legacy
//! success flag (`true`/`false`, bare or as text). Both are accepted on
//! read; only the named form is written.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::types::DownloadResultKind;
use crate::error::StoreResult;

/// Per-child outcome and telemetry inside a bulk download.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionDownloadItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_object_download_task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(
        default,
        deserialize_with = "deserialize_result",
        skip_serializing_if = "Option::is_none"
    )]
    pub result: Option<DownloadResultKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_location_file_container_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_location_file_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_transfer_speed: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percent_complete: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restore_in_progress: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staging_in_progress: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staging_percent_complete: Option<i64>,
}

/// Named kind first; the legacy success flag is accepted as a bool or as
/// its `"true"`/`"false"` text form.
fn deserialize_result<'de, D>(deserializer: D) -> Result<Option<DownloadResultKind>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => None,
        Some(Value::String(flag)) if flag == "true" => Some(DownloadResultKind::Completed),
        Some(Value::String(flag)) if flag == "false" => Some(DownloadResultKind::Failed),
        Some(Value::String(name)) => {
            let kind = DownloadResultKind::parse(&name);
            if kind.is_none() {
                tracing::warn!(result = %name, "unknown collection item result kind, ignoring");
            }
            kind
        }
        Some(Value::Bool(true)) => Some(DownloadResultKind::Completed),
        Some(Value::Bool(false)) => Some(DownloadResultKind::Failed),
        Some(other) => {
            tracing::warn!(result = %other, "unrecognized collection item result shape, ignoring");
            None
        }
    })
}

#[derive(Deserialize)]
struct ItemsBlob {
    #[serde(default)]
    items: Vec<CollectionDownloadItem>,
}

pub(crate) fn encode_items(items: &[CollectionDownloadItem]) -> StoreResult<String> {
    #[derive(Serialize)]
    struct Borrowed<'a> {
        items: &'a [CollectionDownloadItem],
    }
    Ok(serde_json::to_string(&Borrowed { items })?)
}

/// NULL or empty columns decode to an empty list.
pub(crate) fn decode_items(blob: Option<&str>) -> StoreResult<Vec<CollectionDownloadItem>> {
    match blob.map(str::trim).filter(|s| !s.is_empty()) {
        Some(s) => Ok(serde_json::from_str::<ItemsBlob>(s)?.items),
        None => Ok(Vec::new()),
    }
}

pub(crate) fn encode_paths(paths: &[String]) -> StoreResult<String> {
    Ok(serde_json::to_string(paths)?)
}

pub(crate) fn decode_paths(blob: Option<&str>) -> StoreResult<Vec<String>> {
    match blob.map(str::trim).filter(|s| !s.is_empty()) {
        Some(s) => Ok(serde_json::from_str(s)?),
        None => Ok(Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_kind_is_current_encoding() {
        let items = vec![CollectionDownloadItem {
            path: Some("/a/b".into()),
            data_object_download_task_id: Some("t1".into()),
            result: Some(DownloadResultKind::FailedCredentialsNeeded),
            ..Default::default()
        }];
        let json = encode_items(&items).unwrap();
        assert!(json.contains("\"result\":\"FAILED_CREDENTIALS_NEEDED\""));
        assert!(json.contains("\"dataObjectDownloadTaskId\":\"t1\""));
        assert_eq!(decode_items(Some(&json)).unwrap(), items);
    }

    #[test]
    fn legacy_boolean_results_decode() {
        let json = r#"{"items":[
            {"path":"/x","result":true,"size":10},
            {"path":"/y","result":false,"message":"denied"},
            {"path":"/z"},
            {"path":"/u","result":"true"},
            {"path":"/v","result":"false"}
        ]}"#;
        let items = decode_items(Some(json)).unwrap();
        assert_eq!(items[0].result, Some(DownloadResultKind::Completed));
        assert_eq!(items[0].size, Some(10));
        assert_eq!(items[1].result, Some(DownloadResultKind::Failed));
        assert_eq!(items[1].message.as_deref(), Some("denied"));
        assert_eq!(items[2].result, None);
        assert_eq!(items[3].result, Some(DownloadResultKind::Completed));
        assert_eq!(items[4].result, Some(DownloadResultKind::Failed));
    }

    #[test]
    fn unknown_result_shapes_are_not_guessed() {
        let json = r#"{"items":[{"path":"/x","result":"MAYBE"},{"path":"/y","result":1}]}"#;
        let items = decode_items(Some(json)).unwrap();
        assert_eq!(items[0].result, None);
        assert_eq!(items[1].result, None);
    }

    #[test]
    fn empty_blobs_decode_to_empty_lists() {
        assert!(decode_items(None).unwrap().is_empty());
        assert!(decode_items(Some("  ")).unwrap().is_empty());
        assert!(decode_paths(None).unwrap().is_empty());
        let paths = vec!["/a".to_string(), "/b".to_string()];
        assert_eq!(decode_paths(Some(&encode_paths(&paths).unwrap())).unwrap(), paths);
    }
}
