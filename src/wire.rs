//! Newline-delimited JSON command protocol. One request object per line, one
//! response object per line, in order.

use std::sync::Arc;
use std::time::Instant;

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::{debug, error};

use crate::codec::PreferenceInput;
use crate::limits::MAX_FRAME_LEN;
use crate::model::*;
use crate::workflow::{ChoiceError, ChoiceService};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    UpdateFirstChoice {
        customer_id: CustomerId,
        building_id: BuildingId,
        new_datetime: String,
    },
    UpdateFirstChoiceAuthenticated {
        customer_id: CustomerId,
        secret: String,
        building_id: BuildingId,
        new_datetime: String,
    },
    ListAvailableSlots {
        building_id: BuildingId,
        date: String,
    },
    CheckAvailability {
        building_id: BuildingId,
        datetime: String,
        #[serde(default)]
        exclude_customer_id: Option<CustomerId>,
        #[serde(default)]
        menu_id: Option<MenuId>,
    },
    UpdateSecondChoice {
        customer_id: CustomerId,
        secret: String,
        building_id: BuildingId,
        second_choice: String,
    },
    UpdateSecondChoicePreferences {
        customer_id: CustomerId,
        secret: String,
        building_id: BuildingId,
        preferences: PreferenceInput,
    },
    GetCurrentSecondChoice {
        customer_id: CustomerId,
        secret: String,
        building_id: BuildingId,
    },
    ClearSecondChoice {
        customer_id: CustomerId,
        secret: String,
        building_id: BuildingId,
    },
    GetSecondChoiceHistory {
        customer_id: CustomerId,
        secret: String,
        building_id: BuildingId,
        #[serde(default)]
        limit: Option<usize>,
    },
    GetReservation {
        customer_id: CustomerId,
        #[serde(default)]
        secret: Option<String>,
        building_id: BuildingId,
    },
    GetReservationHistory {
        customer_id: CustomerId,
        #[serde(default)]
        secret: Option<String>,
        building_id: BuildingId,
        #[serde(default)]
        limit: Option<usize>,
    },
    GetReservationStatus {
        customer_id: CustomerId,
        #[serde(default)]
        secret: Option<String>,
        building_id: BuildingId,
    },
    GetUpcomingReservations {
        customer_id: CustomerId,
        #[serde(default)]
        secret: Option<String>,
        building_id: BuildingId,
        #[serde(default)]
        days_ahead: Option<u32>,
    },
    GetReservationSummary {
        customer_id: CustomerId,
        #[serde(default)]
        secret: Option<String>,
        building_id: BuildingId,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Response {
    Ok { data: serde_json::Value },
    Error { error: String, message: String },
}

impl Response {
    pub fn ok<T: Serialize>(data: T) -> Self {
        match serde_json::to_value(data) {
            Ok(data) => Response::Ok { data },
            Err(e) => {
                error!("response encoding failed: {e}");
                Response::error("internal_error", "response could not be encoded")
            }
        }
    }

    pub fn error(kind: &str, message: impl Into<String>) -> Self {
        Response::Error {
            error: kind.to_string(),
            message: message.into(),
        }
    }

    fn from_result<T: Serialize>(result: Result<T, ChoiceError>) -> Self {
        match result {
            Ok(data) => Response::ok(data),
            Err(e) => Response::error(e.kind(), e.to_string()),
        }
    }

    pub fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"result":"error","error":"internal_error","message":"response could not be encoded"}"#
                .to_string()
        })
    }
}

/// Run one request against the service.
pub async fn dispatch(service: &ChoiceService, req: Request) -> Response {
    match req {
        Request::UpdateFirstChoice {
            customer_id,
            building_id,
            new_datetime,
        } => Response::from_result(
            service
                .update_first_choice(&customer_id, &building_id, &new_datetime)
                .await,
        ),
        Request::UpdateFirstChoiceAuthenticated {
            customer_id,
            secret,
            building_id,
            new_datetime,
        } => Response::from_result(
            service
                .update_first_choice_authenticated(&customer_id, &secret, &building_id, &new_datetime)
                .await,
        ),
        Request::ListAvailableSlots { building_id, date } => {
            Response::from_result(service.list_available_slots(&building_id, &date).await)
        }
        Request::CheckAvailability {
            building_id,
            datetime,
            exclude_customer_id,
            menu_id,
        } => {
            let check = service
                .engine()
                .check_availability(
                    &building_id,
                    &datetime,
                    exclude_customer_id.as_ref(),
                    menu_id,
                    service.policy(),
                )
                .await;
            Response::ok(check)
        }
        Request::UpdateSecondChoice {
            customer_id,
            secret,
            building_id,
            second_choice,
        } => Response::from_result(
            service
                .update_second_choice(&customer_id, &secret, &building_id, &second_choice)
                .await,
        ),
        Request::UpdateSecondChoicePreferences {
            customer_id,
            secret,
            building_id,
            preferences,
        } => Response::from_result(
            service
                .update_second_choice_preferences(&customer_id, &secret, &building_id, &preferences)
                .await,
        ),
        Request::GetCurrentSecondChoice {
            customer_id,
            secret,
            building_id,
        } => Response::from_result(
            service
                .get_current_second_choice(&customer_id, &secret, &building_id)
                .await,
        ),
        Request::ClearSecondChoice {
            customer_id,
            secret,
            building_id,
        } => Response::from_result(
            service
                .clear_second_choice(&customer_id, &secret, &building_id)
                .await,
        ),
        Request::GetSecondChoiceHistory {
            customer_id,
            secret,
            building_id,
            limit,
        } => Response::from_result(
            service
                .get_second_choice_history(&customer_id, &secret, &building_id, limit)
                .await,
        ),
        Request::GetReservation {
            customer_id,
            secret,
            building_id,
        } => Response::from_result(
            service
                .get_reservation(&customer_id, secret.as_deref(), &building_id)
                .await,
        ),
        Request::GetReservationHistory {
            customer_id,
            secret,
            building_id,
            limit,
        } => Response::from_result(
            service
                .get_reservation_history(&customer_id, secret.as_deref(), &building_id, limit)
                .await,
        ),
        Request::GetReservationStatus {
            customer_id,
            secret,
            building_id,
        } => Response::from_result(
            service
                .get_reservation_status(&customer_id, secret.as_deref(), &building_id)
                .await,
        ),
        Request::GetUpcomingReservations {
            customer_id,
            secret,
            building_id,
            days_ahead,
        } => Response::from_result(
            service
                .get_upcoming_reservations(&customer_id, secret.as_deref(), &building_id, days_ahead)
                .await,
        ),
        Request::GetReservationSummary {
            customer_id,
            secret,
            building_id,
        } => Response::from_result(
            service
                .get_reservation_summary(&customer_id, secret.as_deref(), &building_id)
                .await,
        ),
    }
}

/// Parse one line and dispatch it. Malformed input yields `invalid_request`.
pub async fn handle_line(service: &ChoiceService, line: &str) -> Response {
    let req: Request = match serde_json::from_str(line) {
        Ok(req) => req,
        Err(e) => {
            debug!("malformed request: {e}");
            return Response::error("invalid_request", e.to_string());
        }
    };
    let op = crate::observability::request_label(&req);
    let started = Instant::now();
    let response = dispatch(service, req).await;
    metrics::histogram!(crate::observability::REQUEST_DURATION_SECONDS, "op" => op)
        .record(started.elapsed().as_secs_f64());
    response
}

/// Serve one client until it disconnects.
pub async fn process_connection(
    socket: TcpStream,
    service: Arc<ChoiceService>,
) -> Result<(), LinesCodecError> {
    let mut framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_FRAME_LEN));
    while let Some(line) = framed.next().await {
        let response = match line {
            Ok(line) if line.trim().is_empty() => continue,
            Ok(line) => handle_line(&service, &line).await,
            // The codec skips to the next newline, so the connection stays usable.
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                Response::error("invalid_request", "request line too long")
            }
            Err(e) => return Err(e),
        };
        framed.send(response.to_line()).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_parse_by_op_tag() {
        let req: Request = serde_json::from_str(
            r#"{"op":"update_first_choice","customer_id":"101","building_id":"3760","new_datetime":"2099-01-05 13:00"}"#,
        )
        .unwrap();
        assert_eq!(crate::observability::request_label(&req), "update_first_choice");
        assert_eq!(
            req,
            Request::UpdateFirstChoice {
                customer_id: CustomerId::from("101"),
                building_id: BuildingId::from("3760"),
                new_datetime: "2099-01-05 13:00".into(),
            }
        );

        let req: Request = serde_json::from_str(
            r#"{"op":"get_second_choice_history","customer_id":"101","secret":"s","building_id":"3760"}"#,
        )
        .unwrap();
        assert!(matches!(req, Request::GetSecondChoiceHistory { limit: None, .. }));

        let req: Request = serde_json::from_str(
            r#"{"op":"update_second_choice_preferences","customer_id":"101","secret":"s","building_id":"3760",
                "preferences":{"date1":"2099-01-05","time1":"09:00～12:00"}}"#,
        )
        .unwrap();
        let Request::UpdateSecondChoicePreferences { preferences, .. } = req else {
            panic!("wrong variant");
        };
        assert_eq!(preferences.date1, "2099-01-05");
        assert_eq!(preferences.date2, "");

        let req: Request = serde_json::from_str(
            r#"{"op":"get_upcoming_reservations","customer_id":"101","building_id":"3760","days_ahead":7}"#,
        )
        .unwrap();
        assert_eq!(
            req,
            Request::GetUpcomingReservations {
                customer_id: CustomerId::from("101"),
                secret: None,
                building_id: BuildingId::from("3760"),
                days_ahead: Some(7),
            }
        );
        assert_eq!(crate::observability::request_label(&req), "get_upcoming_reservations");

        let req: Request = serde_json::from_str(
            r#"{"op":"update_first_choice_authenticated","customer_id":"101","secret":"s","building_id":"3760","new_datetime":"2099-01-05 13:00"}"#,
        )
        .unwrap();
        assert!(matches!(req, Request::UpdateFirstChoiceAuthenticated { ref secret, .. } if secret == "s"));
        // The authenticated update has no default secret.
        assert!(serde_json::from_str::<Request>(
            r#"{"op":"update_first_choice_authenticated","customer_id":"101","building_id":"3760","new_datetime":"2099-01-05 13:00"}"#,
        )
        .is_err());
    }

    #[test]
    fn unknown_op_is_rejected() {
        assert!(serde_json::from_str::<Request>(r#"{"op":"drop_tables"}"#).is_err());
        assert!(serde_json::from_str::<Request>(r#"{"building_id":"3760"}"#).is_err());
    }

    #[test]
    fn envelope_shape() {
        let ok: serde_json::Value =
            serde_json::from_str(&Response::ok(serde_json::json!({"n": 1})).to_line()).unwrap();
        assert_eq!(ok, serde_json::json!({"result": "ok", "data": {"n": 1}}));

        let err: serde_json::Value =
            serde_json::from_str(&Response::from_result::<()>(Err(ChoiceError::SlotFull)).to_line())
                .unwrap();
        assert_eq!(err["result"], "error");
        assert_eq!(err["error"], "slot_full");
        assert!(err["message"].as_str().unwrap().contains("fully booked"));
    }
}
