use serde::{Deserialize, Serialize};
use skyfare_core::models::{BaggageType, LineItem, SeatInventory, ShipmentRequest};

/// A line item priced from authoritative seat and baggage records.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PricedLine {
    pub flight_id: i64,
    pub seat_id: i64,
    pub baggage_id: Option<i64>,
    pub passenger_count: u32,
    pub seat_price: i64,
    pub baggage_price: i64,
    /// Price of one ticket: seat + baggage
    pub unit_price: i64,
    pub subtotal: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Quote {
    pub lines: Vec<PricedLine>,
    pub tickets_total: i64,
    pub shipment_cost: i64,
    pub total: i64,
    pub currency: String,
}

impl Quote {
    pub fn ticket_count(&self) -> u32 {
        self.lines.iter().map(|l| l.passenger_count).sum()
    }
}

/// Server-side price computation. Client-submitted prices never reach this.
pub struct PricingEngine {
    currency: String,
}

impl PricingEngine {
    pub fn new(currency: impl Into<String>) -> Self {
        Self {
            currency: currency.into(),
        }
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    /// subtotal = (seat price + baggage price) × passenger count
    pub fn price_line(
        &self,
        item: &LineItem,
        seat: &SeatInventory,
        baggage: Option<&BaggageType>,
    ) -> Result<PricedLine, PricingError> {
        if seat.id != item.seat_id || seat.flight_id != item.flight_id {
            return Err(PricingError::SeatNotOnFlight {
                seat_id: item.seat_id,
                flight_id: item.flight_id,
            });
        }

        if let (Some(expected), Some(found)) = (item.baggage_id, baggage) {
            if expected != found.id {
                return Err(PricingError::BaggageMismatch(expected));
            }
        }

        let baggage_price = baggage.map(|b| b.price).unwrap_or(0);
        if seat.price < 0 || baggage_price < 0 {
            return Err(PricingError::NegativePrice(item.seat_id));
        }

        let unit_price = seat
            .price
            .checked_add(baggage_price)
            .ok_or(PricingError::Overflow)?;
        let subtotal = unit_price
            .checked_mul(i64::from(item.passenger_count))
            .ok_or(PricingError::Overflow)?;

        Ok(PricedLine {
            flight_id: item.flight_id,
            seat_id: item.seat_id,
            baggage_id: item.baggage_id,
            passenger_count: item.passenger_count,
            seat_price: seat.price,
            baggage_price,
            unit_price,
            subtotal,
        })
    }

    /// grand total = Σ line subtotals + shipment cost
    pub fn quote(
        &self,
        lines: Vec<PricedLine>,
        shipment: Option<&ShipmentRequest>,
    ) -> Result<Quote, PricingError> {
        let tickets_total = lines
            .iter()
            .try_fold(0i64, |acc, line| acc.checked_add(line.subtotal))
            .ok_or(PricingError::Overflow)?;

        let shipment_cost = shipment.map(|s| s.cost).unwrap_or(0);
        if shipment_cost < 0 {
            return Err(PricingError::NegativeShipmentCost(shipment_cost));
        }

        let total = tickets_total
            .checked_add(shipment_cost)
            .ok_or(PricingError::Overflow)?;

        Ok(Quote {
            lines,
            tickets_total,
            shipment_cost,
            total,
            currency: self.currency.clone(),
        })
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PricingError {
    #[error("Seat {seat_id} is not sold on flight {flight_id}")]
    SeatNotOnFlight { seat_id: i64, flight_id: i64 },

    #[error("Baggage type {0} does not match the resolved record")]
    BaggageMismatch(i64),

    #[error("Negative catalog price for seat {0}")]
    NegativePrice(i64),

    #[error("Shipment cost must not be negative, got {0}")]
    NegativeShipmentCost(i64),

    #[error("Order total overflows")]
    Overflow,
}

#[cfg(test)]
mod tests {
    use super::*;
    use skyfare_core::models::ShipmentEntry;

    fn seat(id: i64, flight_id: i64, price: i64) -> SeatInventory {
        SeatInventory {
            id,
            flight_id,
            seat_class: "ECONOMY".to_string(),
            price,
            remaining_stock: 10,
        }
    }

    fn item(flight_id: i64, seat_id: i64, baggage_id: Option<i64>, passenger_count: u32) -> LineItem {
        LineItem { flight_id, seat_id, baggage_id, passenger_count }
    }

    #[test]
    fn test_line_includes_baggage_per_passenger() {
        let engine = PricingEngine::new("MXN");
        let bag = BaggageType { id: 7, name: "23kg".into(), price: 300, remaining_stock: None };

        let line = engine
            .price_line(&item(10, 55, Some(7), 3), &seat(55, 10, 1200), Some(&bag))
            .unwrap();

        assert_eq!(line.unit_price, 1500);
        assert_eq!(line.subtotal, 4500);
    }

    #[test]
    fn test_seat_must_belong_to_flight() {
        let engine = PricingEngine::new("MXN");
        let err = engine
            .price_line(&item(11, 55, None, 1), &seat(55, 10, 1200), None)
            .unwrap_err();
        assert_eq!(err, PricingError::SeatNotOnFlight { seat_id: 55, flight_id: 11 });
    }

    #[test]
    fn test_quote_adds_shipment_cost() {
        let engine = PricingEngine::new("MXN");
        let line = engine
            .price_line(&item(10, 55, None, 2), &seat(55, 10, 400), None)
            .unwrap();
        let shipment = ShipmentRequest {
            cost: 150,
            entries: vec![ShipmentEntry { address_id: 1, quantity: 1, description: None }],
        };

        let quote = engine.quote(vec![line], Some(&shipment)).unwrap();

        assert_eq!(quote.tickets_total, 800);
        assert_eq!(quote.total, 950);
        assert_eq!(quote.ticket_count(), 2);
        assert_eq!(quote.currency, "MXN");
    }

    #[test]
    fn test_overflow_is_reported() {
        let engine = PricingEngine::new("MXN");
        let err = engine
            .price_line(&item(10, 55, None, 2), &seat(55, 10, i64::MAX), None)
            .unwrap_err();
        assert_eq!(err, PricingError::Overflow);
    }
}
