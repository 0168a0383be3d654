use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use clap::Parser;
use factorec::{init_tracing, AppState, Config, Hyperparameters, Observation, RecommenderError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "config/default.toml")]
    config: String,

    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Observations CSV (`member_id,item_id,rating`) to seed the catalog with.
    #[arg(long, requires = "scope")]
    observations: Option<String>,

    /// Scope to seed and restore persisted factors for.
    #[arg(long)]
    scope: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    message: String,
}

impl<T> ApiResponse<T> {
    fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: "Success".to_string(),
        }
    }

    fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message,
        }
    }
}

struct ApiError(RecommenderError);

impl From<RecommenderError> for ApiError {
    fn from(err: RecommenderError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            RecommenderError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            RecommenderError::NotFound(_) => StatusCode::NOT_FOUND,
            RecommenderError::NotTrained | RecommenderError::EmptyTrainingSet => StatusCode::CONFLICT,
            RecommenderError::InconsistentState(_) | RecommenderError::Io(_) | RecommenderError::Csv(_) => {
                tracing::error!("Request failed: {}", self.0);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status, Json(ApiResponse::<()>::error(self.0.to_string()))).into_response()
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

#[derive(Debug, Deserialize)]
struct RecommendationQuery {
    top_n: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct FeedbackRequest {
    verdict: String,
}

#[derive(Debug, Serialize)]
struct ReloadSummary {
    members: usize,
    items: usize,
    known_ratings: usize,
}

async fn health_check() -> Json<ApiResponse<HashMap<String, String>>> {
    let mut status = HashMap::new();
    status.insert("status".to_string(), "healthy".to_string());
    status.insert("service".to_string(), "factorec".to_string());
    status.insert("version".to_string(), env!("CARGO_PKG_VERSION").to_string());

    Json(ApiResponse::success(status))
}

async fn record_observation(
    State(state): State<AppState>,
    Path(scope): Path<String>,
    Json(observation): Json<Observation>,
) -> ApiResult<String> {
    state.catalog.record(&scope, &observation)?;
    Ok(Json(ApiResponse::success("Observation recorded".to_string())))
}

async fn reload_ratings(State(state): State<AppState>, Path(scope): Path<String>) -> ApiResult<ReloadSummary> {
    let views = state.ratings_store.reload(&scope).await?;
    Ok(Json(ApiResponse::success(ReloadSummary {
        members: views.engagement.members().len(),
        items: views.engagement.items().len(),
        known_ratings: views.known_ratings.len(),
    })))
}

async fn train_model(
    State(state): State<AppState>,
    Path(scope): Path<String>,
    body: Result<Json<Hyperparameters>, JsonRejection>,
) -> ApiResult<factorec::TrainingReport> {
    let hyperparameters = match body {
        Ok(Json(params)) => params,
        // no JSON body at all: train with the configured defaults
        Err(JsonRejection::MissingJsonContentType(_)) => state.config.training.hyperparameters(),
        Err(rejection) => return Err(RecommenderError::invalid_input(rejection.body_text()).into()),
    };
    let report = state.training_service.train(&scope, &hyperparameters).await?;
    Ok(Json(ApiResponse::success(report)))
}

async fn get_recommendations(
    State(state): State<AppState>,
    Path((scope, member_id)): Path<(String, String)>,
    Query(params): Query<RecommendationQuery>,
) -> ApiResult<Vec<factorec::Recommendation>> {
    let top_n = params.top_n.unwrap_or(state.config.recommendation.default_top_n);
    let recommendations = state
        .recommendation_service
        .recommend(&scope, &member_id, top_n)
        .await?;
    state.feedback_recorder.register(&recommendations);
    Ok(Json(ApiResponse::success(recommendations)))
}

async fn get_recommendation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<factorec::Recommendation> {
    let recommendation = state
        .feedback_recorder
        .get(&id)
        .ok_or_else(|| RecommenderError::NotFound(format!("recommendation {}", id)))?;
    Ok(Json(ApiResponse::success(recommendation)))
}

async fn record_feedback(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<FeedbackRequest>,
) -> ApiResult<factorec::Feedback> {
    let feedback = state.feedback_recorder.record_feedback(id, &request.verdict)?;
    Ok(Json(ApiResponse::success(feedback)))
}

fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/scopes/:scope/observations", post(record_observation))
        .route("/scopes/:scope/reload", post(reload_ratings))
        .route("/scopes/:scope/train", post(train_model))
        .route(
            "/scopes/:scope/members/:member_id/recommendations",
            get(get_recommendations),
        )
        .route("/recommendations/:id", get(get_recommendation))
        .route("/recommendations/:id/feedback", post(record_feedback))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    std::env::set_var("RUST_LOG", &args.log_level);
    init_tracing();

    let config = if std::path::Path::new(&args.config).exists() {
        Config::from_file(&args.config)?
    } else {
        info!("Config file not found, using default configuration");
        Config::default()
    };
    info!("Starting factorec server with config: {:?}", config.server);

    let addr = config.server.socket_addr()?;
    let state = AppState::new(config);

    if let Some(scope) = &args.scope {
        if let Some(path) = &args.observations {
            state.catalog.import_csv(scope, std::path::Path::new(path))?;
        }
        if !state.training_service.restore(scope)? {
            warn!("Scope {} has no trained model yet; POST /scopes/{}/train first", scope, scope);
        }
    }

    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
