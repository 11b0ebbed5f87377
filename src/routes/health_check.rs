use actix_web::HttpResponse;

/// Liveness probe. Touches neither the rate API nor the store.
#[tracing::instrument(name = "Health Check handler")]
pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().finish()
}
