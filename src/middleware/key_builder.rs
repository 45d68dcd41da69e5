use crate::middleware::ThrottleInput;
use actix_web::dev::ServiceRequest;
use actix_web::http::header::HeaderName;
use actix_web::http::StatusCode;
use actix_web::ResponseError;
use std::future::{ready, Ready};
use thiserror::Error;

type CustomFn = Box<dyn Fn(&ServiceRequest) -> Result<String, actix_web::Error>>;

pub type ThrottleInputFuture = Ready<Result<ThrottleInput, actix_web::Error>>;

enum Component {
    Custom(String),
    MatchInfo(String),
    Header(HeaderName),
    Path,
}

/// Utility to create an input function that produces a [ThrottleInput] for a fixed policy.
///
/// Key components are joined with `_` in the order they were added, so
/// `.match_info_key("post_id").header_key(user)` yields keys like `post1_userA`.
///
/// This will not be of any use if you want to choose the policy per request or perform an
/// asynchronous operation; you should instead write your own input function.
pub struct KeyFunctionBuilder {
    policy: String,
    components: Vec<Component>,
    custom_fn: Option<CustomFn>,
}

impl KeyFunctionBuilder {
    pub fn new(policy: &str) -> Self {
        Self {
            policy: policy.to_owned(),
            components: Vec::new(),
            custom_fn: None,
        }
    }

    /// Add a custom component to the rate limiting key
    pub fn custom_key(mut self, key: &str) -> Self {
        self.components.push(Component::Custom(key.to_owned()));
        self
    }

    /// Add a route parameter, such as the `post_id` of `/posts/{post_id}/comments`.
    ///
    /// The middleware must wrap the resource or scope declaring the parameter, parameters are
    /// not yet matched when it wraps the whole App.
    pub fn match_info_key(mut self, name: &str) -> Self {
        self.components.push(Component::MatchInfo(name.to_owned()));
        self
    }

    /// Add the value of a request header, typically one identifying the acting user.
    ///
    /// Requests without the header are rejected with 400 Bad Request.
    pub fn header_key(mut self, name: HeaderName) -> Self {
        self.components.push(Component::Header(name));
        self
    }

    /// Add the request path to the rate limiting key
    pub fn path_key(mut self) -> Self {
        self.components.push(Component::Path);
        self
    }

    /// Dynamically add a custom component to the end of the rate limiting key
    pub fn custom_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&ServiceRequest) -> Result<String, actix_web::Error> + 'static,
    {
        self.custom_fn = Some(Box::new(f));
        self
    }

    pub fn build(self) -> impl Fn(&ServiceRequest) -> ThrottleInputFuture + 'static {
        move |req| ready(self.input(req))
    }

    fn input(&self, req: &ServiceRequest) -> Result<ThrottleInput, actix_web::Error> {
        let mut parts = Vec::with_capacity(self.components.len() + 1);
        for component in &self.components {
            parts.push(match component {
                Component::Custom(custom) => custom.clone(),
                Component::MatchInfo(name) => req
                    .match_info()
                    .get(name)
                    .map(ToOwned::to_owned)
                    .ok_or_else(|| Error::MissingRouteParameter(name.clone()))?,
                Component::Header(name) => header_value(req, name)?,
                Component::Path => req.path().to_owned(),
            });
        }
        if let Some(f) = &self.custom_fn {
            parts.push(f(req)?);
        }
        Ok(ThrottleInput {
            policy: self.policy.clone(),
            key: parts.join("_"),
        })
    }
}

#[derive(Debug, Error)]
enum Error {
    #[error("Route parameter {0} is not available to the rate limiter")]
    MissingRouteParameter(String),
    #[error("Missing {0} header")]
    MissingHeader(HeaderName),
    #[error("Header {0} is not valid text")]
    InvalidHeader(HeaderName),
}

impl ResponseError for Error {
    fn status_code(&self) -> StatusCode {
        match self {
            Error::MissingRouteParameter(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::MissingHeader(_) | Error::InvalidHeader(_) => StatusCode::BAD_REQUEST,
        }
    }
}

fn header_value(req: &ServiceRequest, name: &HeaderName) -> Result<String, Error> {
    let value = req
        .headers()
        .get(name)
        .ok_or_else(|| Error::MissingHeader(name.clone()))?;
    let value = value
        .to_str()
        .map_err(|_| Error::InvalidHeader(name.clone()))?;
    if value.is_empty() {
        return Err(Error::MissingHeader(name.clone()));
    }
    Ok(value.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    fn user() -> HeaderName {
        HeaderName::from_static("x-user-id")
    }

    #[test]
    fn test_components_in_order() {
        let builder = KeyFunctionBuilder::new("comments")
            .custom_key("create")
            .header_key(user())
            .path_key()
            .custom_fn(|_| Ok("tail".to_string()));
        let req = TestRequest::get()
            .uri("/posts/post1/comments")
            .insert_header((user(), "userA"))
            .to_srv_request();
        let input = builder.input(&req).unwrap();
        assert_eq!(input.policy, "comments");
        assert_eq!(input.key, "create_userA_/posts/post1/comments_tail");
    }

    #[test]
    fn test_missing_header() {
        let builder = KeyFunctionBuilder::new("comments").header_key(user());
        let req = TestRequest::get().to_srv_request();
        let err = builder.input(&req).unwrap_err();
        assert_eq!(err.as_response_error().status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_missing_route_parameter() {
        let builder = KeyFunctionBuilder::new("comments").match_info_key("post_id");
        let req = TestRequest::get().uri("/posts/post1/comments").to_srv_request();
        let err = builder.input(&req).unwrap_err();
        assert_eq!(
            err.as_response_error().status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_match_info() {
        let builder = KeyFunctionBuilder::new("comments")
            .match_info_key("post_id")
            .header_key(user());
        let req = TestRequest::get()
            .uri("/posts/post1/comments")
            .param("post_id", "post1")
            .insert_header((user(), "userA"))
            .to_srv_request();
        assert_eq!(builder.input(&req).unwrap().key, "post1_userA");
    }
}
