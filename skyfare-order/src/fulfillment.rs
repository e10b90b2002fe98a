use skyfare_catalog::PricedLine;
use skyfare_core::models::NewTicket;

/// Turns priced line items into ticket records, one per passenger.
pub struct TicketIssuer {
    prefix: String,
}

impl TicketIssuer {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Format: {PREFIX}-{order id, 8 digits}-{1-based sequence, 3 digits}
    pub fn ticket_code(&self, order_id: i64, sequence: usize) -> String {
        format!("{}-{:08}-{:03}", self.prefix, order_id, sequence)
    }

    pub fn issue(&self, order_id: i64, lines: &[PricedLine]) -> Vec<NewTicket> {
        lines
            .iter()
            .flat_map(|line| (0..line.passenger_count).map(move |_| line))
            .enumerate()
            .map(|(index, line)| NewTicket {
                order_id,
                flight_id: line.flight_id,
                seat_id: line.seat_id,
                baggage_id: line.baggage_id,
                price: line.unit_price,
                code: self.ticket_code(order_id, index + 1),
            })
            .collect()
    }
}

impl Default for TicketIssuer {
    fn default() -> Self {
        Self::new("SKY")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(seat_id: i64, passenger_count: u32, unit_price: i64) -> PricedLine {
        PricedLine {
            flight_id: 10,
            seat_id,
            baggage_id: None,
            passenger_count,
            seat_price: unit_price,
            baggage_price: 0,
            unit_price,
            subtotal: unit_price * i64::from(passenger_count),
        }
    }

    #[test]
    fn test_one_ticket_per_passenger() {
        let issuer = TicketIssuer::default();
        let tickets = issuer.issue(42, &[line(55, 2, 1200), line(56, 1, 900)]);

        assert_eq!(tickets.len(), 3);
        assert_eq!(tickets[0].code, "SKY-00000042-001");
        assert_eq!(tickets[2].code, "SKY-00000042-003");
        assert_eq!(tickets[2].seat_id, 56);
        assert_eq!(tickets.iter().map(|t| t.price).sum::<i64>(), 3300);
    }
}
