use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::info;

use crate::audit::CATEGORY_SECOND_CHOICE;
use crate::codec::{self, DecodedChoices, PreferenceInput};
use crate::engine::BuildingTx;
use crate::limits::*;
use crate::model::*;

use super::{observe, ChoiceError, ChoiceService};

/// Audit notes mentioning this phrase count as second-choice history even
/// when filed under another category.
const HISTORY_NOTE_MARKER: &str = "second choice";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecondChoiceUpdated {
    pub reservation_date: String,
    pub second_choice: String,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CurrentSecondChoice {
    pub reservation_date: String,
    pub second_choice: Option<String>,
    pub has_second_choice: bool,
    pub decoded: Option<DecodedChoices>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecondChoiceCleared {
    pub reservation_date: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    pub id: TaioId,
    pub note: String,
    pub category: String,
    pub created: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecondChoiceHistory {
    pub history: Vec<HistoryEntry>,
    pub total_count: usize,
}

/// Trimmed text, or every rule it breaks.
fn validate_text(text: &str) -> Result<String, ChoiceError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ChoiceError::ValidationFailed(vec![
            "second choice text is required".into(),
        ]));
    }
    let mut errors = Vec::new();
    if text.chars().count() > MAX_SECOND_CHOICE_CHARS {
        errors.push(format!(
            "second choice text is too long; at most {MAX_SECOND_CHOICE_CHARS} characters"
        ));
    }
    for c in SECOND_CHOICE_DENYLIST {
        if text.contains(c) {
            errors.push(format!("character {c:?} is not allowed"));
        }
    }
    if !errors.is_empty() {
        return Err(ChoiceError::ValidationFailed(errors));
    }
    Ok(trimmed.to_string())
}

fn masked(text: &str) -> String {
    if text.chars().count() > AUDIT_NOTE_PREVIEW_CHARS {
        let head: String = text.chars().take(AUDIT_NOTE_PREVIEW_CHARS).collect();
        format!("{head}...")
    } else {
        text.to_string()
    }
}

fn current_time_from(tx: &BuildingTx, customer: &CustomerId) -> Result<NaiveDateTime, ChoiceError> {
    tx.latest_active_for(customer)
        .map(|r| r.time_from)
        .ok_or(ChoiceError::ReservationNotFound)
}

impl ChoiceService {
    /// Replace the free-text second choice on the customer's current
    /// reservation.
    pub async fn update_second_choice(
        &self,
        customer: &CustomerId,
        secret: &str,
        building: &BuildingId,
        text: &str,
    ) -> Result<SecondChoiceUpdated, ChoiceError> {
        let result = self.set_text(customer, secret, building, text).await;
        observe("update_second_choice", &result);
        result
    }

    /// Validate and encode three structured preferences, then store them as
    /// the second-choice text. Validation warnings ride along in the payload.
    pub async fn update_second_choice_preferences(
        &self,
        customer: &CustomerId,
        secret: &str,
        building: &BuildingId,
        input: &PreferenceInput,
    ) -> Result<SecondChoiceUpdated, ChoiceError> {
        let result = self.set_preferences(customer, secret, building, input).await;
        observe("update_second_choice_preferences", &result);
        result
    }

    pub async fn get_current_second_choice(
        &self,
        customer: &CustomerId,
        secret: &str,
        building: &BuildingId,
    ) -> Result<CurrentSecondChoice, ChoiceError> {
        let result = self.current(customer, secret, building).await;
        observe("get_current_second_choice", &result);
        result
    }

    pub async fn clear_second_choice(
        &self,
        customer: &CustomerId,
        secret: &str,
        building: &BuildingId,
    ) -> Result<SecondChoiceCleared, ChoiceError> {
        let result = self.clear(customer, secret, building).await;
        observe("clear_second_choice", &result);
        result
    }

    /// Newest-first audit entries tagged `|2|` or mentioning the second choice.
    /// `limit` defaults to 10 and is clamped to `1..=100`.
    pub async fn get_second_choice_history(
        &self,
        customer: &CustomerId,
        secret: &str,
        building: &BuildingId,
        limit: Option<usize>,
    ) -> Result<SecondChoiceHistory, ChoiceError> {
        let result = self.history(customer, secret, building, limit).await;
        observe("get_second_choice_history", &result);
        result
    }

    async fn set_text(
        &self,
        customer: &CustomerId,
        secret: &str,
        building: &BuildingId,
        text: &str,
    ) -> Result<SecondChoiceUpdated, ChoiceError> {
        self.authenticate(customer, secret, building).await?;
        self.store_second_choice(customer, building, text, Vec::new())
            .await
    }

    async fn set_preferences(
        &self,
        customer: &CustomerId,
        secret: &str,
        building: &BuildingId,
        input: &PreferenceInput,
    ) -> Result<SecondChoiceUpdated, ChoiceError> {
        self.authenticate(customer, secret, building).await?;
        let validation = codec::validate(input);
        if !validation.is_valid() {
            return Err(ChoiceError::ValidationFailed(validation.errors));
        }
        let pattern = {
            let bs = self.engine.read(building).await?;
            self.engine.pattern_for(&bs)
        };
        let text = codec::encode(input, pattern.as_deref())?;
        self.store_second_choice(customer, building, &text, validation.warnings)
            .await
    }

    /// Fetch, validate and conditionally commit under one building lock, then
    /// audit after the lock is released.
    async fn store_second_choice(
        &self,
        customer: &CustomerId,
        building: &BuildingId,
        text: &str,
        warnings: Vec<String>,
    ) -> Result<SecondChoiceUpdated, ChoiceError> {
        let mut tx = self.engine.begin(building).await?;
        let time_from = current_time_from(&tx, customer)?;
        let text = validate_text(text)?;

        let rows = self
            .engine
            .update_second_choice(&mut tx, customer, time_from, Some(text.clone()))
            .await?;
        if rows == 0 {
            return Err(ChoiceError::ReservationNotFound);
        }
        drop(tx);

        info!(%building, %customer, "second choice updated");
        self.audit_best_effort(
            customer,
            building,
            format!("[second choice updated] {}", masked(&text)),
            CATEGORY_SECOND_CHOICE,
        )
        .await;

        Ok(SecondChoiceUpdated {
            reservation_date: format_instant(time_from),
            second_choice: text,
            warnings,
        })
    }

    async fn current(
        &self,
        customer: &CustomerId,
        secret: &str,
        building: &BuildingId,
    ) -> Result<CurrentSecondChoice, ChoiceError> {
        self.authenticate(customer, secret, building).await?;
        let bs = self.engine.read(building).await?;
        let current = bs
            .latest_active_for(customer)
            .ok_or(ChoiceError::ReservationNotFound)?;
        let second_choice = current.second_choice.clone();
        Ok(CurrentSecondChoice {
            reservation_date: format_instant(current.time_from),
            has_second_choice: second_choice.is_some(),
            decoded: second_choice.as_deref().map(codec::decode),
            second_choice,
        })
    }

    async fn clear(
        &self,
        customer: &CustomerId,
        secret: &str,
        building: &BuildingId,
    ) -> Result<SecondChoiceCleared, ChoiceError> {
        self.authenticate(customer, secret, building).await?;
        let mut tx = self.engine.begin(building).await?;
        let time_from = current_time_from(&tx, customer)?;
        let rows = self
            .engine
            .update_second_choice(&mut tx, customer, time_from, None)
            .await?;
        if rows == 0 {
            return Err(ChoiceError::ReservationNotFound);
        }
        drop(tx);

        info!(%building, %customer, "second choice cleared");
        self.audit_best_effort(
            customer,
            building,
            "[second choice cleared] second choice removed".to_string(),
            CATEGORY_SECOND_CHOICE,
        )
        .await;
        Ok(SecondChoiceCleared {
            reservation_date: format_instant(time_from),
        })
    }

    async fn history(
        &self,
        customer: &CustomerId,
        secret: &str,
        building: &BuildingId,
        limit: Option<usize>,
    ) -> Result<SecondChoiceHistory, ChoiceError> {
        self.authenticate(customer, secret, building).await?;
        let limit = limit
            .unwrap_or(DEFAULT_HISTORY_LIMIT)
            .clamp(1, MAX_HISTORY_LIMIT);
        let bs = self.engine.read(building).await?;
        let mut records: Vec<&AuditRecord> = bs
            .audit
            .iter()
            .filter(|r| &r.customer_id == customer)
            .filter(|r| {
                r.category.contains(CATEGORY_SECOND_CHOICE) || r.note.contains(HISTORY_NOTE_MARKER)
            })
            .collect();
        records.sort_by(|a, b| b.created.cmp(&a.created).then(b.id.cmp(&a.id)));
        let history: Vec<HistoryEntry> = records
            .into_iter()
            .take(limit)
            .map(|r| HistoryEntry {
                id: r.id,
                note: r.note.clone(),
                category: r.category.clone(),
                created: r.created.format("%Y-%m-%d %H:%M:%S").to_string(),
            })
            .collect();
        Ok(SecondChoiceHistory {
            total_count: history.len(),
            history,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_rules() {
        assert_eq!(validate_text("  weekday mornings ").unwrap(), "weekday mornings");
        assert!(matches!(validate_text("   "), Err(ChoiceError::ValidationFailed(_))));
        let long = "a".repeat(MAX_SECOND_CHOICE_CHARS + 1);
        assert!(matches!(validate_text(&long), Err(ChoiceError::ValidationFailed(_))));
        assert!(validate_text(&"あ".repeat(MAX_SECOND_CHOICE_CHARS)).is_ok());
        match validate_text("<script>") {
            Err(ChoiceError::ValidationFailed(errors)) => assert_eq!(errors.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn mask_keeps_fifty_chars() {
        assert_eq!(masked("short"), "short");
        let long = "x".repeat(60);
        assert_eq!(masked(&long), format!("{}...", "x".repeat(50)));
        assert_eq!(masked(&"y".repeat(50)), "y".repeat(50));
    }
}
