use actix_web::{HttpRequest, HttpResponse, Responder};

/// Endpoint used by the deployment platform to know the server is up.
pub async fn health_check(_: HttpRequest) -> impl Responder {
    HttpResponse::Ok()
}
