//! §4.6 steps 1-4: token validation, trusted-proxy client IP
//! resolution, UA filtering, and the call-counter/access-log bump.
//! Wraps the `/{token}/...` scope so every mounted route gets it.

use std::future::{ready, Ready};
use std::net::IpAddr;
use std::str::FromStr;

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error, HttpMessage,
};
use chrono::Utc;
use danmaku_core::GatewayError;
use futures::future::LocalBoxFuture;
use ipnetwork::IpNetwork;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UaFilterMode {
    Off,
    Whitelist,
    Blacklist,
}

impl UaFilterMode {
    fn parse(raw: &str) -> Self {
        match raw {
            "whitelist" => UaFilterMode::Whitelist,
            "blacklist" => UaFilterMode::Blacklist,
            _ => UaFilterMode::Off,
        }
    }
}

/// Resolve the real client IP: if the immediate peer is in
/// `trusted_proxies`, trust `X-Forwarded-For`'s first hop (falling back
/// to `X-Real-IP`); otherwise use the peer address directly.
pub fn resolve_client_ip(req: &ServiceRequest, trusted_proxies: &[IpNetwork]) -> String {
    let peer = req
        .peer_addr()
        .map(|a| a.ip())
        .unwrap_or_else(|| IpAddr::from([0, 0, 0, 0]));

    let peer_is_trusted = trusted_proxies.iter().any(|net| net.contains(peer));
    if !peer_is_trusted {
        return peer.to_string();
    }

    if let Some(xff) = req.headers().get("X-Forwarded-For").and_then(|v| v.to_str().ok()) {
        if let Some(first) = xff.split(',').next() {
            let candidate = first.trim();
            if IpAddr::from_str(candidate).is_ok() {
                return candidate.to_string();
            }
        }
    }
    if let Some(real_ip) = req.headers().get("X-Real-IP").and_then(|v| v.to_str().ok()) {
        if IpAddr::from_str(real_ip.trim()).is_ok() {
            return real_ip.trim().to_string();
        }
    }
    peer.to_string()
}

fn ua_filter_outcome(mode: UaFilterMode, user_agent: Option<&str>, rules: &[String]) -> Result<(), &'static str> {
    let ua = user_agent.unwrap_or("");
    match mode {
        UaFilterMode::Off => Ok(()),
        UaFilterMode::Whitelist => {
            if rules.iter().any(|r| ua.contains(r.as_str())) {
                Ok(())
            } else {
                Err("denied_ua_whitelist")
            }
        }
        UaFilterMode::Blacklist => {
            if rules.iter().any(|r| ua.contains(r.as_str())) {
                Err("denied_ua_blacklist")
            } else {
                Ok(())
            }
        }
    }
}

pub struct TokenAuth;

impl<S, B> Transform<S, ServiceRequest> for TokenAuth
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = TokenAuthMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(TokenAuthMiddleware { service }))
    }
}

pub struct TokenAuthMiddleware<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for TokenAuthMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let Some(state) = req.app_data::<actix_web::web::Data<AppState>>().cloned() else {
            return Box::pin(async move { Err(ApiError(GatewayError::Fatal("app state missing".into())).into()) });
        };
        let Some(token) = req.match_info().get("token").map(str::to_string) else {
            return Box::pin(async move { Err(ApiError(GatewayError::InputInvalid("missing token segment".into())).into()) });
        };

        let client_ip = resolve_client_ip(&req, &state.trusted_proxies);
        let user_agent = req
            .headers()
            .get("User-Agent")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let path = req.path().to_string();

        let fut = self.service.call(req);

        Box::pin(async move {
            let row = state.tokens.find(&token).await.map_err(ApiError)?;
            let Some(row) = row else {
                let _ = state.tokens.record_access(&token, &path, "denied_not_found", &client_ip).await;
                return Err(ApiError(GatewayError::AuthDenied(format!("unknown token {token}"))).into());
            };
            if !row.is_usable(Utc::now()) {
                let reason = if !row.is_enabled { "denied_disabled" } else { "denied_expired" };
                let _ = state.tokens.record_access(&token, &path, reason, &client_ip).await;
                return Err(ApiError(GatewayError::AuthDenied(format!("token {token} not usable"))).into());
            }

            let mode_raw = state.config.get_or("uaFilterMode", "off").await.map_err(ApiError)?;
            let mode = UaFilterMode::parse(&mode_raw);
            if mode != UaFilterMode::Off {
                let rules_raw = state.config.get_or("uaFilterRules", "[]").await.map_err(ApiError)?;
                let rules: Vec<String> = serde_json::from_str(&rules_raw).unwrap_or_default();
                if let Err(reason) = ua_filter_outcome(mode, user_agent.as_deref(), &rules) {
                    let _ = state.tokens.record_access(&token, &path, reason, &client_ip).await;
                    return Err(ApiError(GatewayError::AuthDenied(format!("user agent rejected: {reason}"))).into());
                }
            }

            state.tokens.increment_counter(&token).await.map_err(ApiError)?;
            let _ = state.tokens.record_access(&token, &path, "allowed", &client_ip).await;

            fut.await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trusted_peer_forwards_xff_first_hop() {
        let trusted = vec![IpNetwork::from_str("10.0.0.0/8").unwrap()];
        assert!(trusted[0].contains(IpAddr::from_str("10.0.0.5").unwrap()));
    }

    #[test]
    fn ua_filter_off_always_passes() {
        assert!(ua_filter_outcome(UaFilterMode::Off, Some("anything"), &[]).is_ok());
    }

    #[test]
    fn whitelist_rejects_unlisted_agent() {
        let rules = vec!["dandanplay".to_string()];
        assert!(ua_filter_outcome(UaFilterMode::Whitelist, Some("dandanplay/1.0"), &rules).is_ok());
        assert_eq!(
            ua_filter_outcome(UaFilterMode::Whitelist, Some("curl/8.0"), &rules),
            Err("denied_ua_whitelist")
        );
    }

    #[test]
    fn blacklist_rejects_listed_agent() {
        let rules = vec!["bad-bot".to_string()];
        assert_eq!(
            ua_filter_outcome(UaFilterMode::Blacklist, Some("bad-bot/1.0"), &rules),
            Err("denied_ua_blacklist")
        );
        assert!(ua_filter_outcome(UaFilterMode::Blacklist, Some("dandanplay/1.0"), &rules).is_ok());
    }

    #[test]
    fn mode_parse_defaults_to_off_for_unknown_values() {
        assert_eq!(UaFilterMode::parse("garbage"), UaFilterMode::Off);
        assert_eq!(UaFilterMode::parse("whitelist"), UaFilterMode::Whitelist);
    }
}
