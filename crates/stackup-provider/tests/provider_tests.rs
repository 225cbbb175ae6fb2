//! Tests for stackup-provider: per-kind clients, registry, memory and HTTP control planes

use serde_json::json;
use stackup_core::{ResourceDescriptor, ResourceId, ResourceKind};
use stackup_provider::*;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

fn standard() -> (Arc<MemoryControlPlane>, ClientRegistry) {
    let api = Arc::new(MemoryControlPlane::new());
    let registry = ClientRegistry::standard(api.clone(), ProviderContext::default());
    (api, registry)
}

fn registry_desc() -> ResourceDescriptor {
    ResourceDescriptor::new("registry", "app").with_attr("repository", "web")
}

// ===========================================================================
// ClientRegistry
// ===========================================================================

#[test]
fn standard_registry_has_all_kinds() {
    let (_, registry) = standard();
    assert_eq!(registry.len(), 5);
    for kind in [
        ResourceKind::registry(),
        ResourceKind::lifecycle_policy(),
        ResourceKind::access_role(),
        ResourceKind::policy_attachment(),
        ResourceKind::hosted_service(),
    ] {
        let client = registry.get(&kind).expect("client registered");
        assert_eq!(client.kind(), kind);
    }
    assert!(registry.get(&ResourceKind::new("queue")).is_none());
}

#[test]
fn update_policies_are_static_per_kind() {
    let (_, registry) = standard();
    let policy = |k: ResourceKind| registry.get(&k).unwrap().update_policy();
    assert_eq!(policy(ResourceKind::registry()), UpdatePolicy::Immutable);
    assert_eq!(policy(ResourceKind::policy_attachment()), UpdatePolicy::Immutable);
    assert_eq!(policy(ResourceKind::lifecycle_policy()), UpdatePolicy::InPlace);
    assert_eq!(policy(ResourceKind::access_role()), UpdatePolicy::InPlace);
    assert_eq!(policy(ResourceKind::hosted_service()), UpdatePolicy::InPlace);
}

struct QueueClient;

#[async_trait::async_trait]
impl ResourceClient for QueueClient {
    fn kind(&self) -> ResourceKind {
        ResourceKind::new("queue")
    }
    fn update_policy(&self) -> UpdatePolicy {
        UpdatePolicy::InPlace
    }
    async fn read(&self, _id: &ResourceId) -> ProviderResult<Option<RemoteObject>> {
        Ok(None)
    }
    async fn create(&self, d: &ResourceDescriptor) -> ProviderResult<RemoteObject> {
        Ok(RemoteObject {
            identifier: d.id.name.clone(),
            attributes: d.attributes.clone(),
            outputs: BTreeMap::new(),
        })
    }
    async fn update(&self, _i: &str, d: &ResourceDescriptor) -> ProviderResult<RemoteObject> {
        self.create(d).await
    }
    async fn destroy(&self, _i: &str) -> ProviderResult<()> {
        Ok(())
    }
}

#[test]
fn new_kind_plugs_in() {
    let (_, mut registry) = standard();
    registry.register(QueueClient);
    assert_eq!(registry.len(), 6);
    assert!(registry.contains(&ResourceKind::new("queue")));
    assert_eq!(registry.kinds()[0].as_str(), "access_role");
}

// ===========================================================================
// Validation
// ===========================================================================

#[test]
fn missing_required_attribute_is_validation_error() {
    let (_, registry) = standard();
    let client = registry.get(&ResourceKind::registry()).unwrap();
    let err = client
        .validate(&ResourceDescriptor::new("registry", "app"))
        .unwrap_err();
    assert!(matches!(err, ProviderError::Validation { .. }));
    assert!(!err.is_transient());
    assert!(client.validate(&registry_desc()).is_ok());
}

#[test]
fn unrendered_placeholder_fails_validation() {
    let (_, registry) = standard();
    let client = registry.get(&ResourceKind::hosted_service()).unwrap();
    let desc = ResourceDescriptor::new("hosted_service", "web").with_attr("image", "${artifact.image}");
    assert!(matches!(
        client.validate(&desc),
        Err(ProviderError::Validation { .. })
    ));
    let desc = ResourceDescriptor::new("hosted_service", "web")
        .with_attr("image", "registry.local/web:1")
        .with_attr("port", 70000);
    assert!(client.validate(&desc).is_err());
}

#[test]
fn registry_repository_name_rules() {
    let (_, registry) = standard();
    let client = registry.get(&ResourceKind::registry()).unwrap();
    let bad = ResourceDescriptor::new("registry", "app").with_attr("repository", "Web App");
    assert!(client.validate(&bad).is_err());
}

#[test]
fn lifecycle_rules_must_not_be_empty() {
    let (_, registry) = standard();
    let client = registry.get(&ResourceKind::lifecycle_policy()).unwrap();
    let empty = ResourceDescriptor::new("lifecycle_policy", "keep")
        .with_attr("registry", "web")
        .with_attr("rules", json!([]));
    assert!(client.validate(&empty).is_err());
    let ok = ResourceDescriptor::new("lifecycle_policy", "keep")
        .with_attr("registry", "web")
        .with_attr("rules", json!([{"keep_last": 10}]));
    assert!(client.validate(&ok).is_ok());
}

// ===========================================================================
// Per-kind clients over MemoryControlPlane
// ===========================================================================

#[tokio::test]
async fn registry_create_derives_url_output() {
    let (api, registry) = standard();
    let client = registry.get(&ResourceKind::registry()).unwrap();

    let created = client.create(&registry_desc()).await.unwrap();
    assert_eq!(created.outputs["url"], "registry.local/web");
    assert!(created.outputs["arn"].contains("repository/web"));
    assert_eq!(created.outputs["id"], created.identifier);

    let read = client
        .read(&ResourceId::new("registry", "app"))
        .await
        .unwrap()
        .expect("exists");
    assert_eq!(read.identifier, created.identifier);
    assert_eq!(api.len(), 1);
}

#[tokio::test]
async fn role_outputs_arn() {
    let (_, registry) = standard();
    let client = registry.get(&ResourceKind::access_role()).unwrap();
    let desc = ResourceDescriptor::new("access_role", "build").with_attr("trust", "build.service");
    let created = client.create(&desc).await.unwrap();
    assert_eq!(created.outputs["arn"], "arn:stackup:iam::000000000000:role/build");
    assert_eq!(created.outputs["name"], "build");
}

#[tokio::test]
async fn service_url_prefers_backend_output() {
    let (api, registry) = standard();
    let client = registry.get(&ResourceKind::hosted_service()).unwrap();
    let desc = ResourceDescriptor::new("hosted_service", "web").with_attr("image", "img:1");

    let derived = client.create(&desc).await.unwrap();
    assert_eq!(derived.outputs["url"], "https://web.us-east-1.services.local");

    api.preset_outputs(
        "services",
        "api",
        [("url".to_string(), "http://127.0.0.1:9000".to_string())]
            .into_iter()
            .collect(),
    );
    let desc = ResourceDescriptor::new("hosted_service", "api").with_attr("image", "img:1");
    let reported = client.create(&desc).await.unwrap();
    assert_eq!(reported.outputs["url"], "http://127.0.0.1:9000");
}

#[tokio::test]
async fn read_absent_is_none() {
    let (_, registry) = standard();
    let client = registry.get(&ResourceKind::access_role()).unwrap();
    let read = client.read(&ResourceId::new("access_role", "ghost")).await.unwrap();
    assert!(read.is_none());
}

#[tokio::test]
async fn update_replaces_attributes() {
    let (_, registry) = standard();
    let client = registry.get(&ResourceKind::access_role()).unwrap();
    let desc = ResourceDescriptor::new("access_role", "build").with_attr("trust", "a");
    let created = client.create(&desc).await.unwrap();

    let desc = desc.with_attr("trust", "b");
    let updated = client.update(&created.identifier, &desc).await.unwrap();
    assert_eq!(updated.attributes["trust"], json!("b"));
    assert!(updated.matches(&desc.attributes));
}

#[tokio::test]
async fn destroy_twice_reports_not_found() {
    let (api, registry) = standard();
    let client = registry.get(&ResourceKind::registry()).unwrap();
    let created = client.create(&registry_desc()).await.unwrap();

    client.destroy(&created.identifier).await.unwrap();
    assert!(api.is_empty());
    let err = client.destroy(&created.identifier).await.unwrap_err();
    assert!(err.is_not_found());
}

// ===========================================================================
// MemoryControlPlane
// ===========================================================================

#[tokio::test]
async fn memory_records_calls() {
    let (api, registry) = standard();
    let client = registry.get(&ResourceKind::registry()).unwrap();
    client.read(&ResourceId::new("registry", "app")).await.unwrap();
    client.create(&registry_desc()).await.unwrap();

    let calls = api.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].op, Op::Get);
    assert_eq!(calls[1].op, Op::Create);
    assert_eq!(api.mutating_calls().len(), 1);
    assert_eq!(api.calls_for(Op::Create, "registries"), 1);

    api.clear_calls();
    assert!(api.calls().is_empty());
}

#[tokio::test]
async fn memory_fault_injection_is_bounded() {
    let (api, registry) = standard();
    api.fail(Op::Create, "registries", ProviderError::transient("throttled"), 2);
    let client = registry.get(&ResourceKind::registry()).unwrap();

    assert!(client.create(&registry_desc()).await.unwrap_err().is_transient());
    assert!(client.create(&registry_desc()).await.unwrap_err().is_transient());
    assert!(client.create(&registry_desc()).await.is_ok());
}

#[tokio::test]
async fn memory_lost_response_still_applies_the_call() {
    let (api, registry) = standard();
    api.lose_responses(Op::Create, "registries", ProviderError::transient("connection reset"), 1);
    let client = registry.get(&ResourceKind::registry()).unwrap();

    assert!(client.create(&registry_desc()).await.unwrap_err().is_transient());
    assert!(api.find("registries", "app").is_some());
    // A repeat now collides with the object the first call made
    assert!(client.create(&registry_desc()).await.unwrap_err().is_conflict());
    assert_eq!(api.len(), 1);
}

#[tokio::test]
async fn memory_create_duplicate_is_conflict() {
    let (api, registry) = standard();
    api.insert_existing("registries", "app", BTreeMap::new());
    let client = registry.get(&ResourceKind::registry()).unwrap();
    let err = client.create(&registry_desc()).await.unwrap_err();
    assert!(matches!(err, ProviderError::Conflict { .. }));
}

#[tokio::test]
async fn retry_policy_with_memory_faults() {
    let (api, registry) = standard();
    api.fail(Op::Create, "registries", ProviderError::transient("503"), 2);
    let client = registry.get(&ResourceKind::registry()).unwrap();
    let policy = RetryPolicy {
        max_attempts: 3,
        base_ms: 1,
        multiplier: 2.0,
        max_ms: 2,
    };
    let desc = registry_desc();
    let created = policy.run("create", || client.create(&desc)).await.unwrap();
    assert_eq!(created.outputs["url"], "registry.local/web");
    assert_eq!(api.calls_for(Op::Create, "registries"), 3);
}

// ===========================================================================
// HttpControlPlane against a local axum server
// ===========================================================================

mod server {
    use axum::extract::{Path, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    pub struct Backend {
        /// (collection, name) -> object
        pub objects: Arc<Mutex<HashMap<(String, String), Value>>>,
        pub fail_creates_with: Arc<Mutex<Option<u16>>>,
        pub seen_auth: Arc<Mutex<Vec<String>>>,
    }

    fn note_auth(state: &Backend, headers: &HeaderMap) {
        if let Some(v) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
            state.seen_auth.lock().unwrap().push(v.to_string());
        }
    }

    async fn read(
        State(state): State<Backend>,
        headers: HeaderMap,
        Path((collection, name)): Path<(String, String)>,
    ) -> Result<Json<Value>, StatusCode> {
        note_auth(&state, &headers);
        state
            .objects
            .lock()
            .unwrap()
            .get(&(collection, name))
            .cloned()
            .map(Json)
            .ok_or(StatusCode::NOT_FOUND)
    }

    async fn create(
        State(state): State<Backend>,
        Path(collection): Path<String>,
        Json(body): Json<Value>,
    ) -> Result<Json<Value>, (StatusCode, String)> {
        if let Some(code) = *state.fail_creates_with.lock().unwrap() {
            return Err((
                StatusCode::from_u16(code).unwrap(),
                r#"{"error":"rejected"}"#.to_string(),
            ));
        }
        let name = body["name"].as_str().unwrap_or_default().to_string();
        let object = json!({
            "id": format!("{}-{}", collection, name),
            "name": name,
            "attributes": body["attributes"],
            "outputs": {"url": format!("http://{}.test", name)},
        });
        state
            .objects
            .lock()
            .unwrap()
            .insert((collection, name), object.clone());
        Ok(Json(object))
    }

    async fn update(
        State(state): State<Backend>,
        Path((collection, id)): Path<(String, String)>,
        Json(body): Json<Value>,
    ) -> Result<Json<Value>, StatusCode> {
        let mut objects = state.objects.lock().unwrap();
        let entry = objects
            .iter_mut()
            .find(|(k, o)| k.0 == collection && o["id"].as_str() == Some(id.as_str()))
            .map(|(_, o)| o)
            .ok_or(StatusCode::NOT_FOUND)?;
        entry["attributes"] = body["attributes"].clone();
        Ok(Json(entry.clone()))
    }

    async fn delete(
        State(state): State<Backend>,
        Path((collection, id)): Path<(String, String)>,
    ) -> StatusCode {
        let mut objects = state.objects.lock().unwrap();
        let key = objects
            .iter()
            .find(|(k, o)| k.0 == collection && o["id"].as_str() == Some(id.as_str()))
            .map(|(k, _)| k.clone());
        match key {
            Some(k) => {
                objects.remove(&k);
                StatusCode::NO_CONTENT
            }
            None => StatusCode::NOT_FOUND,
        }
    }

    pub async fn spawn(state: Backend) -> String {
        let app = Router::new()
            .route("/:collection", post(create))
            .route("/:collection/:key", get(read).put(update).delete(delete))
            .with_state(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }
}

#[tokio::test]
async fn http_control_plane_full_cycle() {
    let backend = server::Backend::default();
    let base = server::spawn(backend.clone()).await;
    let api: Arc<dyn ControlPlane> = Arc::new(
        HttpControlPlane::new(base, Duration::from_secs(5))
            .unwrap()
            .with_token("secret"),
    );
    let registry = ClientRegistry::standard(api, ProviderContext::default());
    let client = registry.get(&ResourceKind::hosted_service()).unwrap();
    let id = ResourceId::new("hosted_service", "web");

    assert!(client.read(&id).await.unwrap().is_none());

    let desc = ResourceDescriptor::new("hosted_service", "web").with_attr("image", "img:1");
    let created = client.create(&desc).await.unwrap();
    assert_eq!(created.identifier, "services-web");
    assert_eq!(created.outputs["url"], "http://web.test");

    let read = client.read(&id).await.unwrap().expect("exists");
    assert!(read.matches(&desc.attributes));

    let desc = desc.with_attr("image", "img:2");
    let updated = client.update(&created.identifier, &desc).await.unwrap();
    assert_eq!(updated.attributes["image"], json!("img:2"));

    client.destroy(&created.identifier).await.unwrap();
    assert!(client.destroy(&created.identifier).await.unwrap_err().is_not_found());

    let auth = backend.seen_auth.lock().unwrap();
    assert!(auth.iter().all(|h| h == "Bearer secret"));
    assert!(!auth.is_empty());
}

#[tokio::test]
async fn http_status_maps_to_error_kind_with_payload() {
    let backend = server::Backend::default();
    let base = server::spawn(backend.clone()).await;
    let api: Arc<dyn ControlPlane> =
        Arc::new(HttpControlPlane::new(base, Duration::from_secs(5)).unwrap());
    let registry = ClientRegistry::standard(api, ProviderContext::default());
    let client = registry.get(&ResourceKind::registry()).unwrap();

    *backend.fail_creates_with.lock().unwrap() = Some(403);
    let err = client.create(&registry_desc()).await.unwrap_err();
    assert!(matches!(err, ProviderError::Auth { .. }));
    assert_eq!(err.payload(), Some(r#"{"error":"rejected"}"#));

    *backend.fail_creates_with.lock().unwrap() = Some(503);
    let err = client.create(&registry_desc()).await.unwrap_err();
    assert!(err.is_transient());
}

#[tokio::test]
async fn http_unreachable_is_transient() {
    let api = HttpControlPlane::new("http://127.0.0.1:1", Duration::from_millis(500)).unwrap();
    let err = api.get("registries", "app").await.unwrap_err();
    assert!(err.is_transient());
}
