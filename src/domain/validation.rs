use crate::models::Order;

use super::errors::ValidationError;

/// Check the required-field rules in order and report the first one broken.
pub fn validate(order: &Order) -> Result<(), ValidationError> {
    if order.order_uid.is_empty() {
        return Err(ValidationError::EmptyOrderUid);
    }

    if order.track_number.is_empty() {
        return Err(ValidationError::EmptyTrackNumber);
    }

    if order.items.is_empty() {
        return Err(ValidationError::EmptyItems);
    }

    Ok(())
}

/// Decode a raw message payload and validate it.
pub fn decode(payload: Option<&[u8]>) -> Result<Order, ValidationError> {
    let bytes = payload.ok_or(ValidationError::EmptyPayload)?;
    let order: Order = serde_json::from_slice(bytes).map_err(ValidationError::MalformedPayload)?;
    validate(&order)?;
    Ok(order)
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Item;

    fn valid_order() -> Order {
        Order {
            order_uid: "uid-1".to_string(),
            track_number: "TRACK-1".to_string(),
            items: vec![Item {
                chrt_id: 1,
                name: "Mascaras".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_accepts_populated_order() {
        assert!(validate(&valid_order()).is_ok());
    }

    #[test]
    fn test_rejects_empty_order_uid() {
        let order = Order {
            order_uid: String::new(),
            ..valid_order()
        };
        assert!(matches!(validate(&order), Err(ValidationError::EmptyOrderUid)));
    }

    #[test]
    fn test_rejects_empty_track_number() {
        let order = Order {
            track_number: String::new(),
            ..valid_order()
        };
        assert!(matches!(
            validate(&order),
            Err(ValidationError::EmptyTrackNumber)
        ));
    }

    #[test]
    fn test_rejects_empty_items() {
        let order = Order {
            items: vec![],
            ..valid_order()
        };
        assert!(matches!(validate(&order), Err(ValidationError::EmptyItems)));
    }

    #[test]
    fn test_reports_first_violated_rule() {
        // Everything is missing: the order UID rule wins.
        assert!(matches!(
            validate(&Order::default()),
            Err(ValidationError::EmptyOrderUid)
        ));

        let order = Order {
            track_number: String::new(),
            items: vec![],
            ..valid_order()
        };
        assert!(matches!(
            validate(&order),
            Err(ValidationError::EmptyTrackNumber)
        ));
    }

    #[test]
    fn test_decode_rejects_garbage_and_missing_payload() {
        assert!(matches!(
            decode(Some(b"{not json")),
            Err(ValidationError::MalformedPayload(_))
        ));
        assert!(matches!(decode(None), Err(ValidationError::EmptyPayload)));
    }

    #[test]
    fn test_decode_runs_validation() {
        let payload = br#"{"order_uid": "a", "track_number": "b", "items": []}"#;
        assert!(matches!(
            decode(Some(payload)),
            Err(ValidationError::EmptyItems)
        ));

        let json = serde_json::to_vec(&valid_order()).unwrap();
        assert_eq!(decode(Some(&json)).unwrap(), valid_order());
    }
}
