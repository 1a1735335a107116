use crate::resolver::ResolveError;
use rocket::http::{ContentType, Status};
use serde_json::json;

#[derive(Debug)]
pub struct ApiError(pub ResolveError);

impl From<ResolveError> for ApiError {
    fn from(error: ResolveError) -> Self {
        ApiError(error)
    }
}

impl ApiError {
    pub fn status(&self) -> Status {
        match self.0 {
            ResolveError::InvalidKeyword => Status::BadRequest,
            ResolveError::NoResultFound => Status::NotFound,
            ResolveError::UpstreamRejected(_) => Status::BadGateway,
            ResolveError::UpstreamUnreachable(_) => Status::ServiceUnavailable,
            ResolveError::Internal(_) => Status::InternalServerError,
        }
    }

    fn title(&self) -> &'static str {
        match self.0 {
            ResolveError::InvalidKeyword => "Invalid keyword",
            ResolveError::NoResultFound => "No image found",
            ResolveError::UpstreamRejected(_) => "Upstream error",
            ResolveError::UpstreamUnreachable(_) => "Network error",
            ResolveError::Internal(_) => "Internal error",
        }
    }
}

impl<'r> rocket::response::Responder<'r, 'static> for ApiError {
    fn respond_to(self, _: &'r rocket::Request<'_>) -> rocket::response::Result<'static> {
        let body = json!({
            "error": self.title(),
            "message": self.0.to_string()
        })
        .to_string();

        rocket::Response::build()
            .status(self.status())
            .header(ContentType::JSON)
            .sized_body(None, std::io::Cursor::new(body))
            .ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_errors_map_to_statuses() {
        assert_eq!(ApiError(ResolveError::InvalidKeyword).status(), Status::BadRequest);
        assert_eq!(ApiError(ResolveError::NoResultFound).status(), Status::NotFound);
        assert_eq!(ApiError(ResolveError::UpstreamRejected(429)).status(), Status::BadGateway);
        assert_eq!(
            ApiError(ResolveError::UpstreamUnreachable("timed out".to_string())).status(),
            Status::ServiceUnavailable
        );
        assert_eq!(
            ApiError::from(ResolveError::Internal("boom".to_string())).status(),
            Status::InternalServerError
        );
    }
}
