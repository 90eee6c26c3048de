use crate::core::errors::OreError;
use crate::core::kernel::codec::{BodyDecoder, JsonDecoder};
use crate::core::types::ErrorResponse;
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, trace};

/// Status signalling that the session token is stale
pub const UNAUTHORIZED: u16 = 401;

/// Outcome of a single exchange with the Ore API
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub enum OreResponse<V> {
    /// 2xx, body decoded with the success codec
    Success(V),
    /// 401, the cached session is no longer valid
    ReAuthenticate,
    /// Any other status, with the normalized error message if one was sent
    Failure { code: u16, message: Option<String> },
}

impl<V> OreResponse<V> {
    pub const fn success(value: V) -> Self {
        Self::Success(value)
    }

    pub const fn failure(code: u16, message: Option<String>) -> Self {
        Self::Failure { code, message }
    }

    pub const fn was_successful(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Representative status code for this outcome
    pub const fn response_code(&self) -> u16 {
        match self {
            Self::Success(_) => 200,
            Self::ReAuthenticate => UNAUTHORIZED,
            Self::Failure { code, .. } => *code,
        }
    }

    pub fn map<U, F: FnOnce(V) -> U>(self, f: F) -> OreResponse<U> {
        match self {
            Self::Success(value) => OreResponse::Success(f(value)),
            Self::ReAuthenticate => OreResponse::ReAuthenticate,
            Self::Failure { code, message } => OreResponse::Failure { code, message },
        }
    }

    /// Convert into a plain value, turning every non-success outcome into an error
    pub fn into_result(self) -> Result<V, OreError> {
        match self {
            Self::Success(value) => Ok(value),
            Self::ReAuthenticate => Err(OreError::SessionExpired),
            Self::Failure { code, message } => Err(OreError::ApiError { code, message }),
        }
    }
}

enum ClassifierState<D> {
    AwaitingStatus(D),
    Success(D),
    Unauthorized,
    Failure {
        code: u16,
        decoder: Option<JsonDecoder<ErrorResponse>>,
        received: bool,
    },
}

/// Per-exchange state machine turning a status line and body into an [`OreResponse`]
///
/// Only the numeric status drives classification. A 401 body is never
/// decoded; any other non-success body is decoded as an [`ErrorResponse`] when
/// it is JSON and ignored otherwise.
pub struct ResponseClassifier<D: BodyDecoder> {
    state: ClassifierState<D>,
}

impl<D: BodyDecoder> ResponseClassifier<D> {
    pub fn new(decoder: D) -> Self {
        Self {
            state: ClassifierState::AwaitingStatus(decoder),
        }
    }

    pub fn on_status(&mut self, status: u16, content_type: Option<&str>) -> Result<(), OreError> {
        if (100..200).contains(&status) {
            trace!(status, "Ignoring informational response");
            return Ok(());
        }

        let placeholder = ClassifierState::Unauthorized;
        let ClassifierState::AwaitingStatus(mut decoder) =
            std::mem::replace(&mut self.state, placeholder)
        else {
            return Err(OreError::MalformedPayload(format!(
                "Received a second final status ({}) for one exchange",
                status
            )));
        };

        self.state = match status {
            200..=299 => {
                decoder.start(content_type)?;
                ClassifierState::Success(decoder)
            }
            UNAUTHORIZED => ClassifierState::Unauthorized,
            code => {
                let mut error_decoder = JsonDecoder::<ErrorResponse>::new();
                let decoder = match error_decoder.start(content_type) {
                    Ok(()) => Some(error_decoder),
                    Err(e) => {
                        debug!(status = code, error = %e, "Ignoring non-JSON error body");
                        None
                    }
                };
                ClassifierState::Failure {
                    code,
                    decoder,
                    received: false,
                }
            }
        };

        Ok(())
    }

    /// Whether body bytes should be read at all
    pub fn wants_body(&self) -> bool {
        matches!(
            self.state,
            ClassifierState::Success(_)
                | ClassifierState::Failure {
                    decoder: Some(_),
                    ..
                }
        )
    }

    pub fn on_data(&mut self, chunk: &[u8]) -> Result<(), OreError> {
        match &mut self.state {
            ClassifierState::AwaitingStatus(_) => Err(OreError::MalformedPayload(
                "Received body data before a status line".to_string(),
            )),
            ClassifierState::Success(decoder) => decoder.feed(chunk),
            ClassifierState::Unauthorized => Ok(()),
            ClassifierState::Failure {
                decoder, received, ..
            } => {
                if let Some(decoder) = decoder {
                    *received |= !chunk.is_empty();
                    decoder.feed(chunk)?;
                }
                Ok(())
            }
        }
    }

    pub fn finish(self) -> Result<OreResponse<D::Output>, OreError> {
        match self.state {
            ClassifierState::AwaitingStatus(_) => Err(OreError::NetworkError(
                "Exchange ended before a status line was received".to_string(),
            )),
            ClassifierState::Success(decoder) => decoder.finish().map(OreResponse::Success),
            ClassifierState::Unauthorized => Ok(OreResponse::ReAuthenticate),
            ClassifierState::Failure {
                code,
                decoder,
                received,
            } => {
                let message = match decoder {
                    Some(decoder) if received => match decoder.finish() {
                        Ok(error) => error.message(),
                        Err(e) => {
                            debug!(status = code, error = %e, "Discarding undecodable error body");
                            None
                        }
                    },
                    _ => None,
                };
                Ok(OreResponse::Failure { code, message })
            }
        }
    }
}

/// Drive a [`ResponseClassifier`] from a completed reqwest response, streaming the body
pub async fn classify<D: BodyDecoder>(
    mut response: reqwest::Response,
    decoder: D,
) -> Result<OreResponse<D::Output>, OreError> {
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let mut classifier = ResponseClassifier::new(decoder);
    classifier.on_status(response.status().as_u16(), content_type.as_deref())?;

    if classifier.wants_body() {
        while let Some(chunk) = response.chunk().await.map_err(|e| {
            OreError::NetworkError(format!("Failed to read response body: {}", e))
        })? {
            classifier.on_data(&chunk)?;
        }
    }

    classifier.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::kernel::codec::{DiscardDecoder, APPLICATION_JSON};
    use crate::core::types::Version;

    fn run(status: u16, content_type: Option<&str>, body: &[u8]) -> OreResponse<Version> {
        let mut classifier = ResponseClassifier::new(JsonDecoder::<Version>::new());
        classifier.on_status(status, content_type).unwrap();
        if classifier.wants_body() {
            for chunk in body.chunks(3) {
                classifier.on_data(chunk).unwrap();
            }
        }
        classifier.finish().unwrap()
    }

    #[test]
    fn test_every_2xx_is_success() {
        for status in 200..300 {
            let response = run(status, Some(APPLICATION_JSON), br#"{"id":"v1"}"#);
            match response {
                OreResponse::Success(version) => assert_eq!(version.name, "v1"),
                other => panic!("status {status} classified as {other:?}"),
            }
        }
    }

    #[test]
    fn test_non_2xx_is_never_success() {
        for status in (300..600).filter(|s| *s != 401) {
            let response = run(status, Some(APPLICATION_JSON), br#"{"id":"v1"}"#);
            assert!(
                matches!(response, OreResponse::Failure { code, .. } if code == status),
                "status {status} classified as {response:?}"
            );
        }
    }

    #[test]
    fn test_unauthorized_never_decodes_body() {
        let mut classifier = ResponseClassifier::new(JsonDecoder::<Version>::new());
        classifier
            .on_status(401, Some("text/html"))
            .expect("401 must not validate the content type");
        assert!(!classifier.wants_body());
        classifier.on_data(b"<html>not json</html>").unwrap();
        assert_eq!(classifier.finish().unwrap(), OreResponse::ReAuthenticate);

        let response = run(401, Some(APPLICATION_JSON), br#"{"user_error":"x"}"#);
        assert_eq!(response, OreResponse::ReAuthenticate);
    }

    #[test]
    fn test_failure_uses_user_error() {
        let response = run(
            422,
            Some("application/json; charset=utf-8"),
            br#"{"user_error":"channel does not exist","request_id":3}"#,
        );
        assert_eq!(
            response,
            OreResponse::failure(422, Some("channel does not exist".to_string()))
        );
    }

    #[test]
    fn test_failure_without_body() {
        assert_eq!(run(404, None, b""), OreResponse::failure(404, None));
        assert_eq!(
            run(500, Some(APPLICATION_JSON), b""),
            OreResponse::failure(500, None)
        );
    }

    #[test]
    fn test_failure_with_unusable_body() {
        assert_eq!(
            run(502, Some("text/html"), b"<h1>Bad Gateway</h1>"),
            OreResponse::failure(502, None)
        );
        assert_eq!(
            run(500, Some(APPLICATION_JSON), b"{not json"),
            OreResponse::failure(500, None)
        );
    }

    #[test]
    fn test_success_with_bad_body_is_malformed() {
        let mut classifier = ResponseClassifier::new(JsonDecoder::<Version>::new());
        classifier.on_status(200, Some(APPLICATION_JSON)).unwrap();
        classifier.on_data(b"[1, 2").unwrap();
        assert!(matches!(
            classifier.finish(),
            Err(OreError::MalformedPayload(_))
        ));

        let mut classifier = ResponseClassifier::new(JsonDecoder::<Version>::new());
        assert!(matches!(
            classifier.on_status(200, Some("text/plain")),
            Err(OreError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_informational_responses_are_ignored() {
        let mut classifier = ResponseClassifier::new(DiscardDecoder);
        classifier.on_status(100, None).unwrap();
        classifier.on_status(103, None).unwrap();
        classifier.on_status(204, None).unwrap();
        assert_eq!(classifier.finish().unwrap(), OreResponse::Success(()));
    }

    #[test]
    fn test_no_status_is_transport_failure() {
        let classifier = ResponseClassifier::new(DiscardDecoder);
        assert!(matches!(
            classifier.finish(),
            Err(OreError::NetworkError(_))
        ));
    }

    #[test]
    fn test_into_result_covers_every_outcome() {
        assert_eq!(OreResponse::success(5).into_result().unwrap(), 5);
        assert!(matches!(
            OreResponse::<()>::ReAuthenticate.into_result(),
            Err(OreError::SessionExpired)
        ));
        assert!(matches!(
            OreResponse::<()>::failure(403, Some("nope".to_string())).into_result(),
            Err(OreError::ApiError { code: 403, message: Some(m) }) if m == "nope"
        ));
    }
}
