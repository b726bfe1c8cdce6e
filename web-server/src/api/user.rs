// web-server/src/api/user.rs
use actix_web::{get, web, HttpResponse, Responder};
use common::models::auth::UserInfo;
use common::models::user::User;

/// Profile of the authenticated caller
#[get("/info")]
pub async fn info(user: web::ReqData<User>) -> impl Responder {
    HttpResponse::Ok().json(UserInfo::from(&*user))
}
