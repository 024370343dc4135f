//! VTEX catalog API operations used by the workers.

use crate::client::{ApiRequest, RawResponse, ResilientTransport};
use crate::models::{ImageFile, ItemId, ItemRecord, TransportError};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// SKU detail fields we care about.
#[derive(Debug, Deserialize)]
struct SkuDetails {
    #[serde(rename = "ProductName", default)]
    product_name: Option<String>,
    #[serde(rename = "NameComplete", default)]
    name_complete: Option<String>,
    #[serde(rename = "Name", default)]
    name: Option<String>,
    #[serde(rename = "RefId", default)]
    ref_id: Option<serde_json::Value>,
}

impl SkuDetails {
    /// First non-blank of ProductName, NameComplete, Name.
    fn raw_name(&self) -> Option<String> {
        [&self.product_name, &self.name_complete, &self.name]
            .into_iter()
            .flatten()
            .find(|n| !n.trim().is_empty())
            .cloned()
    }

    fn ref_id(&self) -> Option<String> {
        match self.ref_id.as_ref()? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Null => None,
            other => Some(other.to_string()),
        }
    }
}

/// Catalog API client: fetch an item's state, write one image label.
pub struct CatalogClient {
    transport: Arc<ResilientTransport>,
    base_url: String,
}

impl CatalogClient {
    pub fn new(transport: Arc<ResilientTransport>, base_url: impl Into<String>) -> Self {
        Self {
            transport,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn transport(&self) -> &Arc<ResilientTransport> {
        &self.transport
    }

    pub fn sku_url(&self, id: &ItemId) -> String {
        format!("{}/stockkeepingunit/{}", self.base_url, id)
    }

    pub fn files_url(&self, id: &ItemId) -> String {
        format!("{}/stockkeepingunit/{}/file", self.base_url, id)
    }

    pub fn file_url(&self, id: &ItemId, file_id: u64) -> String {
        format!("{}/stockkeepingunit/{}/file/{}", self.base_url, id, file_id)
    }

    /// Fetch the item's name and its images.
    ///
    /// A 404 on the image list means the SKU has no images.
    pub async fn fetch_item(&self, id: &ItemId) -> Result<ItemRecord, TransportError> {
        let response = self
            .transport
            .execute(&ApiRequest::get(id, "get_sku", self.sku_url(id)))
            .await?;
        let details: SkuDetails = decode(&response)?;

        let images = match self
            .transport
            .execute(&ApiRequest::get(id, "list_images", self.files_url(id)))
            .await
        {
            Ok(response) => decode::<Option<Vec<ImageFile>>>(&response)?.unwrap_or_default(),
            Err(TransportError::ClientError { status: 404, .. }) => Vec::new(),
            Err(e) => return Err(e),
        };

        Ok(ItemRecord {
            id: id.clone(),
            raw_name: details.raw_name(),
            ref_id: details.ref_id(),
            images,
        })
    }

    /// Write `label` to both alt-text fields of one image.
    pub async fn update_image_label(
        &self,
        id: &ItemId,
        image: &ImageFile,
        label: &str,
    ) -> Result<(), TransportError> {
        let payload = serde_json::to_value(image.relabeled(label))
            .map_err(|e| TransportError::Decode(format!("Serializing image payload: {e}")))?;

        self.transport
            .execute(&ApiRequest::put(
                id,
                "update_image",
                self.file_url(id, image.id),
                payload,
            ))
            .await?;
        Ok(())
    }
}

fn decode<T: DeserializeOwned>(response: &RawResponse) -> Result<T, TransportError> {
    let body = if response.body.trim().is_empty() {
        "null"
    } else {
        response.body.as_str()
    };
    serde_json::from_str(body).map_err(|e| TransportError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{BackoffPolicy, RateLimiter};
    use crate::testing::{BASE_URL, Scripted, ScriptedBackend};
    use reqwest::Method;
    use serde_json::json;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn client(backend: Arc<ScriptedBackend>) -> CatalogClient {
        let transport = ResilientTransport::new(
            backend,
            Arc::new(RateLimiter::new(Duration::from_millis(10))),
            BackoffPolicy::default(),
            CancellationToken::new(),
        );
        CatalogClient::new(Arc::new(transport), BASE_URL)
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_item_prefers_product_name() {
        let backend = Arc::new(ScriptedBackend::new());
        let id = ItemId::from(10);
        backend.on(
            Method::GET,
            &format!("{BASE_URL}/stockkeepingunit/10"),
            vec![Scripted::json(
                200,
                json!({"ProductName": "", "NameComplete": "Dipirona 500mg", "Name": "x", "RefId": "R-10"}),
            )],
        );
        backend.on(
            Method::GET,
            &format!("{BASE_URL}/stockkeepingunit/10/file"),
            vec![Scripted::json(200, json!([{"Id": 1, "Label": "old"}, {"Id": 2}]))],
        );

        let record = client(Arc::clone(&backend)).fetch_item(&id).await.unwrap();
        assert_eq!(record.raw_name.as_deref(), Some("Dipirona 500mg"));
        assert_eq!(record.ref_id.as_deref(), Some("R-10"));
        assert_eq!(record.images.len(), 2);
        assert_eq!(record.images[0].current_label(), Some("old"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_image_list_means_no_images() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.on(
            Method::GET,
            &format!("{BASE_URL}/stockkeepingunit/11"),
            vec![Scripted::json(200, json!({"Name": "Soro"}))],
        );
        backend.on(
            Method::GET,
            &format!("{BASE_URL}/stockkeepingunit/11/file"),
            vec![Scripted::status(404)],
        );

        let record = client(backend).fetch_item(&ItemId::from(11)).await.unwrap();
        assert!(record.images.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_body_is_decode_error() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.on(
            Method::GET,
            &format!("{BASE_URL}/stockkeepingunit/12"),
            vec![Scripted::text(200, "<html>maintenance</html>")],
        );

        let err = client(backend).fetch_item(&ItemId::from(12)).await.unwrap_err();
        assert!(matches!(err, TransportError::Decode(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_sends_full_payload_with_new_label() {
        let backend = Arc::new(ScriptedBackend::new());
        let url = format!("{BASE_URL}/stockkeepingunit/13/file/5");
        backend.on(Method::PUT, &url, vec![Scripted::json(200, json!({}))]);

        let image: ImageFile =
            serde_json::from_value(json!({"Id": 5, "Label": "old", "IsMain": true})).unwrap();
        client(Arc::clone(&backend))
            .update_image_label(&ItemId::from(13), &image, "novo rótulo")
            .await
            .unwrap();

        let calls = backend.calls();
        assert_eq!(calls.len(), 1);
        let body = calls[0].body.as_ref().unwrap();
        assert_eq!(body["Label"], "novo rótulo");
        assert_eq!(body["Text"], "novo rótulo");
        assert_eq!(body["IsMain"], true);
        assert_eq!(body["Id"], 5);
    }
}
