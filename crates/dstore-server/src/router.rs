use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use dstore_engine::Collection;
use dstore_store::ObjectStore;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::error::ServerResult;
use crate::handler::{self, CollectionState};
use crate::health::{self, AdminState};

/// Everything the router serves.
#[derive(Clone, Debug)]
pub struct AppState {
    pub admin: AdminState,
    pub collections: Vec<Arc<Collection>>,
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Build every configured collection on top of `store`.
    pub fn from_config(config: &ServerConfig, store: Arc<dyn ObjectStore>) -> ServerResult<Self> {
        config.validate()?;
        let collections = config
            .collections
            .iter()
            .map(|c| Collection::new(c.clone(), store.clone(), config.export_config()).map(Arc::new))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            admin: AdminState {
                store,
                health_key: config.health_key.clone(),
                system_code: config.system_code.clone(),
            },
            collections,
            shutdown: CancellationToken::new(),
        })
    }
}

fn collection_routes(state: CollectionState) -> Router {
    Router::new()
        .route("/__count", get(handler::count))
        .route("/__ids", get(handler::ids))
        .route("/__export", get(handler::export))
        .route(
            "/:id",
            get(handler::get_item)
                .put(handler::put_item)
                .delete(handler::delete_item),
        )
        .with_state(state)
}

/// Build the axum router with admin endpoints and one mount per collection.
pub fn build_router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/__ping", get(health::ping))
        .route("/ping", get(health::ping))
        .route("/__build-info", get(health::build_info))
        .route("/build-info", get(health::build_info))
        .route("/__health", get(health::health))
        .route("/__gtg", get(health::gtg))
        .with_state(state.admin);

    for collection in state.collections {
        let path = format!("/{}", collection.config().route().trim_matches('/'));
        let routes = collection_routes(CollectionState {
            collection,
            shutdown: state.shutdown.clone(),
        });
        router = router.nest(&path, routes);
    }
    router.layer(TraceLayer::new_for_http())
}
