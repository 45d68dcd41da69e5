pub mod builder;
pub mod key_builder;

use crate::backend::Backend;
use crate::limiter::Permit;
use crate::{Error, RateLimiter};
use actix_web::body::EitherBody;
use actix_web::dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::http::header::HeaderMap;
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use builder::{Denial, ThrottleBuilder};
use futures::future::{ok, LocalBoxFuture, Ready};
use std::{future::Future, rc::Rc};

type AllowedTransformation = dyn Fn(&mut HeaderMap, &crate::backend::WindowOutput, bool);
type DeniedResponse = dyn Fn(&Denial) -> HttpResponse;
type RollbackCondition = dyn Fn(StatusCode) -> bool;

/// What an input function hands to the [Throttle]: the policy to apply and the key to count
/// the request against.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ThrottleInput {
    pub policy: String,
    pub key: String,
}

/// Rate limit middleware backed by a [RateLimiter].
pub struct Throttle<BA, F> {
    limiter: RateLimiter<BA>,
    input_fn: Rc<F>,
    allowed_transformation: Option<Rc<AllowedTransformation>>,
    denied_response: Rc<DeniedResponse>,
    rollback_condition: Option<Rc<RollbackCondition>>,
}

impl<BA, F> Clone for Throttle<BA, F>
where
    BA: Backend,
{
    fn clone(&self) -> Self {
        Self {
            limiter: self.limiter.clone(),
            input_fn: self.input_fn.clone(),
            allowed_transformation: self.allowed_transformation.clone(),
            denied_response: self.denied_response.clone(),
            rollback_condition: self.rollback_condition.clone(),
        }
    }
}

impl<BA, F, O> Throttle<BA, F>
where
    BA: Backend + 'static,
    F: Fn(&ServiceRequest) -> O + 'static,
    O: Future<Output = Result<ThrottleInput, actix_web::Error>>,
{
    /// # Arguments
    ///
    /// * `limiter`: The rate limiter the requests are counted against.
    /// * `input_fn`: A future that picks the policy and key based on the incoming request, see
    ///   [KeyFunctionBuilder](key_builder::KeyFunctionBuilder).
    pub fn builder(limiter: RateLimiter<BA>, input_fn: F) -> ThrottleBuilder<BA, F> {
        ThrottleBuilder::new(limiter, input_fn)
    }
}

impl<S, B, BA, F, O> Transform<S, ServiceRequest> for Throttle<BA, F>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = actix_web::Error> + 'static,
    S::Future: 'static,
    B: 'static,
    BA: Backend + 'static,
    F: Fn(&ServiceRequest) -> O + 'static,
    O: Future<Output = Result<ThrottleInput, actix_web::Error>>,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = actix_web::Error;
    type Transform = ThrottleMiddleware<S, BA, F>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(ThrottleMiddleware {
            service: Rc::new(service),
            limiter: self.limiter.clone(),
            input_fn: Rc::clone(&self.input_fn),
            allowed_transformation: self.allowed_transformation.clone(),
            denied_response: self.denied_response.clone(),
            rollback_condition: self.rollback_condition.clone(),
        })
    }
}

pub struct ThrottleMiddleware<S, BA, F> {
    service: Rc<S>,
    limiter: RateLimiter<BA>,
    input_fn: Rc<F>,
    allowed_transformation: Option<Rc<AllowedTransformation>>,
    denied_response: Rc<DeniedResponse>,
    rollback_condition: Option<Rc<RollbackCondition>>,
}

impl<S, B, BA, F, O> Service<ServiceRequest> for ThrottleMiddleware<S, BA, F>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = actix_web::Error> + 'static,
    S::Future: 'static,
    B: 'static,
    BA: Backend + 'static,
    F: Fn(&ServiceRequest) -> O + 'static,
    O: Future<Output = Result<ThrottleInput, actix_web::Error>>,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = actix_web::Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let limiter = self.limiter.clone();
        let input_fn = self.input_fn.clone();
        let allowed_transformation = self.allowed_transformation.clone();
        let denied_response = self.denied_response.clone();
        let rollback_condition = self.rollback_condition.clone();

        Box::pin(async move {
            let input = match (input_fn)(&req).await {
                Ok(input) => input,
                Err(e) => {
                    log::error!("Throttle input function failed: {e}");
                    return Ok(req.into_response(e.error_response()).map_into_right_body());
                }
            };

            let Permit { output, token } = match limiter.acquire(&input.key, &input.policy) {
                Ok(permit) => permit,
                Err(Error::RateLimitExceeded { policy, wait }) => {
                    let limit = limiter
                        .policies()
                        .get(&policy)
                        .map(|p| p.max_requests)
                        .unwrap_or_default();
                    let denial = Denial {
                        policy,
                        limit,
                        wait,
                    };
                    let response: HttpResponse = (denied_response)(&denial);
                    return Ok(req.into_response(response).map_into_right_body());
                }
                // Misconfiguration is never let through
                Err(e) => {
                    log::error!("Throttle rejected request: {e}");
                    return Ok(req.into_response(e.error_response()).map_into_right_body());
                }
            };

            let mut service_response = service.call(req).await?;

            let mut rolled_back = false;
            if let Some(rollback_condition) = rollback_condition {
                let status = service_response.status();
                if rollback_condition(status) {
                    log::debug!(
                        "Returning rate limit slot for '{}' after response {status}",
                        input.key
                    );
                    limiter.rollback(token);
                    rolled_back = true;
                }
            }

            if let Some(transformation) = allowed_transformation {
                (transformation)(service_response.headers_mut(), &output, rolled_back);
            }

            Ok(service_response.map_into_left_body())
        })
    }
}
