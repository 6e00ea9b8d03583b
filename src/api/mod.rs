//! HTTP endpoints for linked bots that open requests on behalf of users the
//! chat does not know.

use actix_web::dev::Server;
use actix_web::{web, App, HttpResponse, HttpServer};
use chrono::NaiveDateTime;

use crate::bot::Bot;
use crate::commands::request::{describe, lookup_title};
use crate::database::current_time;
use crate::doi::parse_doi;
use crate::error::WorkflowError;
use crate::models::Request;

#[derive(Deserialize)]
struct NewRequestBody {
    doi: String,
    chat_id: i64,
}

#[derive(Deserialize)]
struct RequestQuery {
    doi: String,
}

#[derive(Serialize)]
struct RequestView {
    request_id: i32,
    doi: String,
    title: Option<String>,
    chat_id: i64,
    status: String,
    created_at: NaiveDateTime,
    expires_at: NaiveDateTime,
}

impl From<&Request> for RequestView {
    fn from(request: &Request) -> Self {
        RequestView {
            request_id: request.id,
            doi: request.doi.clone(),
            title: request.title.clone(),
            chat_id: request.chat_id,
            status: request.status.to_string(),
            created_at: request.created_at,
            expires_at: request.expires_at,
        }
    }
}

fn error_body(message: &str) -> serde_json::Value {
    serde_json::json!({ "error": message })
}

fn conflict(existing: &Request) -> HttpResponse {
    HttpResponse::Conflict().json(serde_json::json!({
        "error": "an open request for this DOI already exists",
        "request_id": existing.id,
        "status": existing.status.to_string(),
    }))
}

async fn create_request(bot: web::Data<Bot>, body: web::Json<NewRequestBody>) -> HttpResponse {
    let doi = match parse_doi(&body.doi) {
        Ok(doi) => doi,
        Err(err) => return HttpResponse::BadRequest().json(error_body(&err.to_string())),
    };

    match bot.db.find_open_request(&doi) {
        Ok(Some(existing)) => return conflict(&existing),
        Ok(None) => {}
        Err(err) => {
            error!("Open request lookup for {} failed: {}", doi, err);
            return HttpResponse::InternalServerError().finish();
        }
    }

    let title = lookup_title(&bot, &doi).await;
    let label = match &title {
        Some(title) => format!("{} ({})", title, doi),
        None => doi.clone(),
    };
    let announcement = format!(
        "📚 Someone is looking for {}.\nReply to this message with the PDF if you have it.",
        label
    );
    let anchor = match bot.transport.send_text(body.chat_id, &announcement, None).await {
        Ok(message_id) => message_id,
        Err(err) => {
            warn!("Could not announce {} in {}: {:#}", doi, body.chat_id, err);
            return HttpResponse::BadGateway().json(error_body("could not post the request to the chat"));
        }
    };

    match bot
        .db
        .create_request(&doi, body.chat_id, None, anchor, title.as_deref(), current_time())
    {
        Ok(request) => {
            info!("Request {} opened for {} via the API", request.id, describe(&request));
            HttpResponse::Created().json(serde_json::json!({
                "request_id": request.id,
                "status": request.status.to_string(),
            }))
        }
        Err(err) => {
            if let Err(delete_err) = bot.transport.delete_message(body.chat_id, anchor).await {
                warn!("Failed to withdraw announcement {}: {:#}", anchor, delete_err);
            }
            match err {
                WorkflowError::DuplicateRequest(existing) => conflict(&existing),
                err => {
                    error!("Failed to create request for {}: {}", doi, err);
                    HttpResponse::InternalServerError().finish()
                }
            }
        }
    }
}

async fn find_request(bot: web::Data<Bot>, query: web::Query<RequestQuery>) -> HttpResponse {
    let doi = match parse_doi(&query.doi) {
        Ok(doi) => doi,
        Err(err) => return HttpResponse::BadRequest().json(error_body(&err.to_string())),
    };
    match bot.db.latest_request_for_doi(&doi) {
        Ok(Some(request)) => HttpResponse::Ok().json(RequestView::from(&request)),
        Ok(None) => HttpResponse::NotFound().json(error_body("no request for this DOI")),
        Err(err) => {
            error!("Request lookup for {} failed: {}", doi, err);
            HttpResponse::InternalServerError().finish()
        }
    }
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "build": env!("GIT_HASH"),
    }))
}

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health))
        .route("/api/requests", web::post().to(create_request))
        .route("/api/requests", web::get().to(find_request));
}

pub fn start_api(bot: Bot, bind: &str) -> std::io::Result<Server> {
    let data = web::Data::new(bot);
    let server = HttpServer::new(move || App::new().app_data(data.clone()).configure(routes))
        .workers(2)
        .bind(bind)?
        .run();
    info!("API listening on {}", bind);
    Ok(server)
}
