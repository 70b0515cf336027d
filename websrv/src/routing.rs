// SPDX-FileCopyrightText: Copyright (C) The eggplant authors
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The HTTP surface. Requests are decoded here, handed to the use case
//! layer and the outcomes translated back into status codes; no
//! application logic lives in this module.

use std::{convert::Infallible, sync::Arc};

use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use warp::{
    filters::BoxedFilter,
    http::{
        header::{CONTENT_LENGTH, CONTENT_TYPE},
        HeaderValue, StatusCode,
    },
    hyper::Body,
    path::Tail,
    reject::{MethodNotAllowed, Reject, Rejection},
    reply::{Reply, Response},
    Filter,
};

use eggplant_core::{
    auth::{AccessToken, InvitationToken, ReadUser},
    music::AlbumId,
};
use eggplant_store::ConvertedFile;
use eggplant_usecases::{
    auth::Auth,
    music::Music,
    stats::Stats,
    Error,
};

#[derive(Debug, Clone)]
struct AuthenticatedUser {
    user: ReadUser,
    token: AccessToken,
}

#[derive(Debug)]
struct ApiReject(Error);

impl Reject for ApiReject {}

fn reject(err: Error) -> Rejection {
    warp::reject::custom(ApiReject(err))
}

pub(crate) fn create_filters(
    auth: Arc<Auth>,
    music: Arc<Music>,
    stats: Arc<Stats>,
) -> BoxedFilter<(impl Reply,)> {
    let with_auth = warp::any().map(move || Arc::clone(&auth));
    let with_music = warp::any().map(move || Arc::clone(&music));
    let with_stats = warp::any().map(move || Arc::clone(&stats));

    // Anything with an unusable token degrades to an anonymous request;
    // the handlers decide what anonymous visitors may do.
    let authenticated = warp::header::optional::<String>("authorization")
        .and(with_auth.clone())
        .and_then(|header: Option<String>, auth: Arc<Auth>| async move {
            Ok::<_, Rejection>(authenticate(header, &auth).await)
        });

    let browse = warp::get()
        .and(warp::path("browse"))
        .and(warp::path::tail())
        .and(authenticated.clone())
        .and(with_music.clone())
        .and_then(handle_browse);

    let search = warp::get()
        .and(warp::path!("search"))
        .and(warp::query::<SearchQuery>())
        .and(authenticated.clone())
        .and(with_music.clone())
        .and_then(handle_search);

    let track = warp::get()
        .and(warp::path!("track" / String))
        .and(with_music.clone())
        .and_then(handle_track);

    let thumbnail = warp::get()
        .and(warp::path!("thumbnail" / String))
        .and(with_music)
        .and_then(handle_thumbnail);

    let stats = warp::get()
        .and(warp::path!("stats"))
        .and(with_stats)
        .and_then(handle_stats);

    let register_initial = warp::post()
        .and(warp::path!("auth" / "register-initial"))
        .and(warp::body::json())
        .and(with_auth.clone())
        .and_then(handle_register_initial);

    let register = warp::post()
        .and(warp::path!("auth" / "register"))
        .and(warp::body::json())
        .and(authenticated.clone())
        .and(with_auth.clone())
        .and_then(handle_register);

    let login = warp::post()
        .and(warp::path!("auth" / "login"))
        .and(warp::body::json())
        .and(authenticated.clone())
        .and(with_auth.clone())
        .and_then(handle_login);

    let logout = warp::post()
        .and(warp::path!("auth" / "logout"))
        .and(authenticated.clone())
        .and(with_auth.clone())
        .and_then(handle_logout);

    let create_invitation = warp::post()
        .and(warp::path!("auth" / "create-invitation"))
        .and(authenticated.clone())
        .and(with_auth.clone())
        .and_then(handle_create_invitation);

    let current_user = warp::get()
        .and(warp::path!("auth"))
        .and(authenticated.clone())
        .and_then(handle_current_user);

    let list_users = warp::get()
        .and(warp::path!("auth" / "users"))
        .and(authenticated.clone())
        .and(with_auth.clone())
        .and_then(handle_list_users);

    let remove_user = warp::post()
        .and(warp::path!("auth" / "users" / String / "remove"))
        .and(authenticated.clone())
        .and(with_auth.clone())
        .and_then(handle_remove_user);

    let set_password = warp::post()
        .and(warp::path!("auth" / "users" / String / "password"))
        .and(warp::body::json())
        .and(authenticated)
        .and(with_auth)
        .and_then(handle_set_password);

    let api = browse
        .or(search)
        .or(track)
        .or(thumbnail)
        .or(stats)
        .or(register_initial)
        .or(register)
        .or(login)
        .or(logout)
        .or(create_invitation)
        .or(current_user)
        .or(list_users)
        .or(remove_user)
        .or(set_password);

    warp::path("api").and(api).boxed()
}

async fn authenticate(header: Option<String>, auth: &Auth) -> Option<AuthenticatedUser> {
    let header = header?;
    let token = header.strip_prefix("Bearer ").unwrap_or(&header);
    let token = AccessToken::new(token);
    let user = auth.check_access_token(&token).await.ok()?;
    Some(AuthenticatedUser { user, token })
}

fn require_admin(user: Option<&AuthenticatedUser>) -> Result<(), Rejection> {
    match user {
        Some(authenticated) if authenticated.user.administrator => Ok(()),
        _ => Err(reject(Error::Forbidden)),
    }
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    query: String,
}

#[derive(Debug, Deserialize)]
struct RegisterInitialInput {
    username: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct RegisterInput {
    username: String,
    password: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct LoginInput {
    username: String,
    password: String,
}

#[derive(Debug, Serialize)]
struct TokenResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct SetPasswordInput {
    password: String,
}

async fn handle_browse(
    path: Tail,
    user: Option<AuthenticatedUser>,
    music: Arc<Music>,
) -> Result<Response, Rejection> {
    let ids: Vec<AlbumId> = path
        .as_str()
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(AlbumId::from)
        .collect();
    let album = music
        .browse(&ids, user.is_none())
        .await
        .map_err(reject)?;
    Ok(warp::reply::json(&album).into_response())
}

async fn handle_search(
    query: SearchQuery,
    user: Option<AuthenticatedUser>,
    music: Arc<Music>,
) -> Result<Response, Rejection> {
    let result = music
        .search(&query.query, user.is_none())
        .await
        .map_err(reject)?;
    Ok(warp::reply::json(&result).into_response())
}

async fn handle_track(id: String, music: Arc<Music>) -> Result<Response, Rejection> {
    validate_id(&id)?;
    let file = music.track(&id).await.map_err(reject)?;
    Ok(serve_converted_file(file, "audio/ogg"))
}

async fn handle_thumbnail(id: String, music: Arc<Music>) -> Result<Response, Rejection> {
    validate_id(&id)?;
    let file = music.thumbnail(&id).await.map_err(reject)?;
    Ok(serve_converted_file(file, "image/jpeg"))
}

async fn handle_stats(stats: Arc<Stats>) -> Result<Response, Rejection> {
    let report = stats.get().await.map_err(reject)?;
    Ok(warp::reply::json(&report).into_response())
}

async fn handle_register_initial(
    input: RegisterInitialInput,
    auth: Arc<Auth>,
) -> Result<Response, Rejection> {
    auth.register_initial(&input.username, &input.password)
        .await
        .map_err(reject)?;
    Ok(warp::reply::json(&()).into_response())
}

async fn handle_register(
    input: RegisterInput,
    user: Option<AuthenticatedUser>,
    auth: Arc<Auth>,
) -> Result<Response, Rejection> {
    if user.is_some() {
        return Err(reject(Error::InvalidParameters(
            "you are already signed in".into(),
        )));
    }
    auth.register(
        &input.username,
        &input.password,
        &InvitationToken::new(input.token.as_str()),
    )
    .await
    .map_err(reject)?;
    Ok(warp::reply::json(&()).into_response())
}

async fn handle_login(
    input: LoginInput,
    user: Option<AuthenticatedUser>,
    auth: Arc<Auth>,
) -> Result<Response, Rejection> {
    if user.is_some() {
        return Err(reject(Error::InvalidParameters(
            "you are already signed in".into(),
        )));
    }
    let token = auth
        .login(&input.username, &input.password)
        .await
        .map_err(reject)?;
    Ok(warp::reply::json(&TokenResponse {
        token: token.as_str().to_owned(),
    })
    .into_response())
}

async fn handle_logout(
    user: Option<AuthenticatedUser>,
    auth: Arc<Auth>,
) -> Result<Response, Rejection> {
    let Some(authenticated) = user else {
        return Err(reject(Error::Unauthorized));
    };
    auth.logout(&authenticated.token).await.map_err(reject)?;
    Ok(warp::reply::json(&()).into_response())
}

async fn handle_create_invitation(
    user: Option<AuthenticatedUser>,
    auth: Arc<Auth>,
) -> Result<Response, Rejection> {
    require_admin(user.as_ref())?;
    let token = auth.create_invitation().await.map_err(reject)?;
    Ok(warp::reply::json(&TokenResponse {
        token: token.as_str().to_owned(),
    })
    .into_response())
}

async fn handle_current_user(user: Option<AuthenticatedUser>) -> Result<Response, Rejection> {
    let Some(authenticated) = user else {
        return Err(reject(Error::Unauthorized));
    };
    Ok(warp::reply::json(&authenticated.user).into_response())
}

async fn handle_list_users(
    user: Option<AuthenticatedUser>,
    auth: Arc<Auth>,
) -> Result<Response, Rejection> {
    require_admin(user.as_ref())?;
    let users = auth.list().await.map_err(reject)?;
    Ok(warp::reply::json(&users).into_response())
}

async fn handle_remove_user(
    username: String,
    user: Option<AuthenticatedUser>,
    auth: Arc<Auth>,
) -> Result<Response, Rejection> {
    require_admin(user.as_ref())?;
    auth.remove(&username).await.map_err(reject)?;
    Ok(warp::reply::json(&()).into_response())
}

async fn handle_set_password(
    username: String,
    input: SetPasswordInput,
    user: Option<AuthenticatedUser>,
    auth: Arc<Auth>,
) -> Result<Response, Rejection> {
    require_admin(user.as_ref())?;
    auth.set_password(&username, &input.password)
        .await
        .map_err(reject)?;
    Ok(warp::reply::json(&()).into_response())
}

fn validate_id(id: &str) -> Result<(), Rejection> {
    if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(reject(Error::InvalidParameters("invalid id".into())));
    }
    Ok(())
}

fn serve_converted_file(file: ConvertedFile, content_type: &'static str) -> Response {
    let ConvertedFile { len, content, .. } = file;
    let mut response = Response::new(Body::wrap_stream(ReaderStream::new(content)));
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
        .headers_mut()
        .insert(CONTENT_LENGTH, HeaderValue::from(len));
    response
}

/// An API error serializable to JSON.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorResponseBody {
    code: u16,
    message: String,
}

pub(crate) async fn handle_rejection(rejection: Rejection) -> Result<impl Reply, Infallible> {
    let (code, message) = if rejection.is_not_found() {
        (StatusCode::NOT_FOUND, "Not Found".to_owned())
    } else if let Some(ApiReject(err)) = rejection.find::<ApiReject>() {
        match err {
            Error::NotFound => (StatusCode::NOT_FOUND, "Not Found".to_owned()),
            Error::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_owned()),
            Error::Forbidden => (StatusCode::FORBIDDEN, "Forbidden".to_owned()),
            Error::UsernameTaken => (StatusCode::CONFLICT, "Username is taken.".to_owned()),
            Error::InvalidParameters(message) => (StatusCode::BAD_REQUEST, message.clone()),
            Error::Conflict => (StatusCode::CONFLICT, "Conflict".to_owned()),
            Error::Other(err) => {
                log::error!("internal error: {err:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error".to_owned(),
                )
            }
        }
    } else if let Some(err) = rejection.find::<warp::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, err.to_string())
    } else if let Some(err) = rejection.find::<warp::reject::InvalidQuery>() {
        (StatusCode::BAD_REQUEST, err.to_string())
    } else if let Some(err) = rejection.find::<MethodNotAllowed>() {
        // This must have the least priority, because most rejections
        // contain a MethodNotAllowed element.
        (StatusCode::METHOD_NOT_ALLOWED, err.to_string())
    } else {
        log::error!("unhandled rejection: {rejection:?}");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("{rejection:?}"),
        )
    };

    let json_reply = warp::reply::json(&ErrorResponseBody {
        code: code.as_u16(),
        message,
    });
    Ok(warp::reply::with_status(json_reply, code))
}
