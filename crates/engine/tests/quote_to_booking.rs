//! End-to-end operator flow: itinerary generation against credits, the
//! public quote link, booking with agent commission, payments and invoicing.

mod common;

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use tripdesk_core::TripdeskError;
    use tripdesk_engine::{BookingTerms, GenerateItinerary};
    use tripdesk_core::Currency;
    use tripdesk_finance::{
        AgentStatus, BookingStatus, Commission, InvoiceStatus, NewAgent, NewInvoicePayment, NewPayment, PaymentKind,
        QuoteStatus,
    };
    use tripdesk_platform::AuditFilter;

    use crate::common::*;

    fn generate(itinerary_id: Option<Uuid>, agent_id: Option<Uuid>) -> GenerateItinerary {
        GenerateItinerary {
            request: istanbul_request(),
            customer: customer(),
            agent_id,
            client_id: None,
            itinerary_id,
        }
    }

    fn payment(kind: PaymentKind, major: i64, key: Option<&str>) -> NewPayment {
        NewPayment {
            kind,
            amount: eur(major),
            method: "bank_transfer".into(),
            reference: None,
            paid_on: today(),
            notes: None,
            recorded_by: Uuid::nil(),
            idempotency_key: key.map(str::to_string),
        }
    }

    #[test]
    fn test_generation_needs_credits() {
        let p = platform();
        let op = p.operator("sunway");
        p.stock_istanbul(&op);

        let err = p.desk.generate_itinerary(&op.actor, op.org, generate(None, None)).unwrap_err();
        assert!(matches!(err, TripdeskError::InsufficientCredits { .. }));
        assert!(p.desk.list_quotes(&op.actor, op.org, None).unwrap().is_empty());
    }

    #[test]
    fn test_generation_is_charged_once_per_itinerary() {
        let p = platform();
        let op = p.operator("sunway");
        p.stock_istanbul(&op);
        p.fund(&op, tl(500));

        let itinerary = Uuid::new_v4();
        let quote = p
            .desk
            .generate_itinerary(&op.actor, op.org, generate(Some(itinerary), None))
            .unwrap();
        assert_eq!(quote.status, QuoteStatus::Draft);
        // hotel 100 x 2 nights x 2 adults + tour 40 x 2 adults
        assert_eq!(quote.total, eur(480));
        assert_eq!(quote.days.len(), 2);

        let again = p
            .desk
            .generate_itinerary(&op.actor, op.org, generate(Some(itinerary), None))
            .unwrap();
        assert_eq!(again.id, quote.id);

        let account = p.desk.credit_account(&op.actor, op.org).unwrap();
        assert_eq!(account.balance, tl(450));
        assert_eq!(account.total_spent, tl(50));
        assert_eq!(p.desk.list_quotes(&op.actor, op.org, None).unwrap().len(), 1);
    }

    #[test]
    fn test_public_link_flow() {
        let p = platform();
        let op = p.operator("sunway");
        p.stock_istanbul(&op);
        p.fund(&op, tl(500));
        let quote = p.desk.generate_itinerary(&op.actor, op.org, generate(None, None)).unwrap();

        // drafts are not visible to customers
        assert!(matches!(
            p.desk.public_view(&quote.public_token, "203.0.113.7", Utc::now()),
            Err(TripdeskError::NotFound { .. })
        ));

        p.desk.send_quote(&op.actor, quote.id).unwrap();
        let view = p.desk.public_view(&quote.public_token, "203.0.113.7", Utc::now()).unwrap();
        assert_eq!(view.status, QuoteStatus::Viewed);
        assert_eq!(view.per_person, Some(eur(240)));

        let accepted = p.desk.public_accept(&quote.public_token, "203.0.113.7", Utc::now()).unwrap();
        assert_eq!(accepted.status, QuoteStatus::Accepted);
        assert!(p
            .desk
            .public_reject(&quote.public_token, None, "203.0.113.7", Utc::now())
            .is_err());
    }

    #[test]
    fn test_public_link_is_rate_limited() {
        let p = platform();
        let op = p.operator("sunway");
        p.stock_istanbul(&op);
        p.fund(&op, tl(500));
        let quote = p.desk.generate_itinerary(&op.actor, op.org, generate(None, None)).unwrap();
        p.desk.send_quote(&op.actor, quote.id).unwrap();

        let now = Utc::now();
        let limit = p.desk.config().public.rate_limit_max_requests;
        for _ in 0..limit {
            p.desk.public_view(&quote.public_token, "198.51.100.1", now).unwrap();
        }
        assert!(matches!(
            p.desk.public_view(&quote.public_token, "198.51.100.1", now),
            Err(TripdeskError::RateLimited { .. })
        ));
        // other clients are unaffected
        assert!(p.desk.public_view(&quote.public_token, "198.51.100.2", now).is_ok());
    }

    #[test]
    fn test_booking_with_agent_commission_and_payments() {
        let p = platform();
        let op = p.operator("sunway");
        p.stock_istanbul(&op);
        p.fund(&op, tl(500));

        let agent = p
            .desk
            .add_agent(
                &op.actor,
                op.org,
                NewAgent {
                    company_name: "Bosphorus Partners".into(),
                    contact_person: "Emre Yildiz".into(),
                    email: "emre@bosphorus.example".into(),
                    commission: Commission::Percentage { bps: 1_000 },
                    currency: Currency::Eur,
                },
            )
            .unwrap();
        let quote = p
            .desk
            .generate_itinerary(&op.actor, op.org, generate(None, Some(agent.id)))
            .unwrap();

        // a draft cannot be booked
        assert!(matches!(
            p.desk.create_booking_from_quote(&op.actor, quote.id, BookingTerms::default()),
            Err(TripdeskError::InvalidTransition { .. })
        ));
        p.desk.send_quote(&op.actor, quote.id).unwrap();

        let booking = p
            .desk
            .create_booking_from_quote(
                &op.actor,
                quote.id,
                BookingTerms {
                    deposit_amount: Some(eur(100)),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(booking.status, BookingStatus::Confirmed);
        assert_eq!(p.desk.get_quote(&op.actor, quote.id).unwrap().status, QuoteStatus::Accepted);
        assert!(matches!(
            p.desk.create_booking_from_quote(&op.actor, quote.id, BookingTerms::default()),
            Err(TripdeskError::Conflict(_))
        ));

        let balances = p.desk.agent_balances(&op.actor, op.org).unwrap();
        assert_eq!(balances.total, eur(48));

        let (booking, deposit) = p
            .desk
            .record_booking_payment(&op.actor, booking.id, payment(PaymentKind::Deposit, 100, Some("dep-1")))
            .unwrap();
        assert_eq!(booking.status, BookingStatus::DepositReceived);
        assert_eq!(deposit.recorded_by, op.actor.user_id);

        let (_, retried) = p
            .desk
            .record_booking_payment(&op.actor, booking.id, payment(PaymentKind::Deposit, 100, Some("dep-1")))
            .unwrap();
        assert_eq!(retried.id, deposit.id);

        assert!(p
            .desk
            .record_booking_payment(&op.actor, booking.id, payment(PaymentKind::Balance, 400, None))
            .is_err());
        let (booking, _) = p
            .desk
            .record_booking_payment(&op.actor, booking.id, payment(PaymentKind::Balance, 380, None))
            .unwrap();
        assert_eq!(booking.status, BookingStatus::FullyPaid);

        p.desk
            .add_booking_cost(&op.actor, booking.id, None, "Hotel block", None, eur(300))
            .unwrap();
        let margin = p.desk.booking_margin(&op.actor, booking.id).unwrap();
        assert_eq!(margin.margin, eur(180));
    }

    #[test]
    fn test_booking_invoice_is_paid_in_full() {
        let p = platform();
        let op = p.operator("sunway");
        p.stock_istanbul(&op);
        p.fund(&op, tl(500));
        let quote = p.desk.generate_itinerary(&op.actor, op.org, generate(None, None)).unwrap();
        p.desk.send_quote(&op.actor, quote.id).unwrap();
        let booking = p
            .desk
            .create_booking_from_quote(&op.actor, quote.id, BookingTerms::default())
            .unwrap();

        let invoice = p.desk.invoice_booking(&op.actor, booking.id, 0, 14).unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Draft);
        assert_eq!(invoice.total, eur(480));
        assert!(invoice.invoice_number.starts_with("INV-"));

        p.desk.send_invoice(&op.actor, invoice.id).unwrap();
        let paid = p
            .desk
            .record_invoice_payment(
                &op.actor,
                invoice.id,
                NewInvoicePayment {
                    amount: eur(480),
                    method: "card".into(),
                    reference: Some("AUTH-1".into()),
                    paid_on: today(),
                    recorded_by: Uuid::nil(),
                    idempotency_key: None,
                },
            )
            .unwrap();
        assert_eq!(paid.status, InvoiceStatus::Paid);
        assert!(paid.balance_due.is_zero());

        let summary = p.desk.receivables_summary(&op.actor, op.org).unwrap();
        assert_eq!(summary.received, eur(480));
        assert!(summary.outstanding.is_zero());
    }

    #[test]
    fn test_free_generation_rate_needs_no_credits() {
        let p = platform();
        let op = p.operator("sunway");
        p.stock_istanbul(&op);
        p.desk
            .set_usage_rate(&p.admin, ITINERARY, tl(0), Utc::now())
            .unwrap();

        let quote = p.desk.generate_itinerary(&op.actor, op.org, generate(None, None)).unwrap();
        assert_eq!(quote.total, eur(480));
        let account = p.desk.credit_account(&op.actor, op.org).unwrap();
        assert!(account.balance.is_zero());
        assert!(account.total_spent.is_zero());
        assert!(p.desk.credit_history(&op.actor, op.org, 10, 0).unwrap().is_empty());
    }

    #[test]
    fn test_zero_commission_agent_books_cleanly() {
        let p = platform();
        let op = p.operator("sunway");
        p.stock_istanbul(&op);
        p.fund(&op, tl(500));

        let agent = p
            .desk
            .add_agent(
                &op.actor,
                op.org,
                NewAgent {
                    company_name: "Golden Horn Referrals".into(),
                    contact_person: "Deniz Acar".into(),
                    email: "deniz@goldenhorn.example".into(),
                    commission: Commission::Percentage { bps: 0 },
                    currency: Currency::Eur,
                },
            )
            .unwrap();
        let quote = p
            .desk
            .generate_itinerary(&op.actor, op.org, generate(None, Some(agent.id)))
            .unwrap();
        p.desk.send_quote(&op.actor, quote.id).unwrap();

        let booking = p
            .desk
            .create_booking_from_quote(&op.actor, quote.id, BookingTerms::default())
            .unwrap();
        assert_eq!(booking.agent_id, Some(agent.id));
        assert!(p.desk.agent_statement(&op.actor, agent.id).unwrap().is_empty());
        assert!(p.desk.agent_balances(&op.actor, op.org).unwrap().total.is_zero());

        let trail = p
            .desk
            .audit_trail(
                &op.actor,
                AuditFilter {
                    action: Some("booking_create".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(trail.len(), 1);
    }

    #[test]
    fn test_inactive_agent_blocks_booking_before_anything_is_written() {
        let p = platform();
        let op = p.operator("sunway");
        p.stock_istanbul(&op);
        p.fund(&op, tl(500));

        let agent = p
            .desk
            .add_agent(
                &op.actor,
                op.org,
                NewAgent {
                    company_name: "Bosphorus Partners".into(),
                    contact_person: "Emre Yildiz".into(),
                    email: "emre@bosphorus.example".into(),
                    commission: Commission::Percentage { bps: 1_000 },
                    currency: Currency::Eur,
                },
            )
            .unwrap();
        let quote = p
            .desk
            .generate_itinerary(&op.actor, op.org, generate(None, Some(agent.id)))
            .unwrap();
        p.desk.send_quote(&op.actor, quote.id).unwrap();
        p.desk
            .set_agent_status(&op.actor, agent.id, AgentStatus::Inactive)
            .unwrap();

        assert!(matches!(
            p.desk.create_booking_from_quote(&op.actor, quote.id, BookingTerms::default()),
            Err(TripdeskError::Conflict(_))
        ));
        assert!(p.desk.list_bookings(&op.actor, op.org, None).unwrap().is_empty());
        assert_eq!(p.desk.get_quote(&op.actor, quote.id).unwrap().status, QuoteStatus::Sent);

        p.desk
            .set_agent_status(&op.actor, agent.id, AgentStatus::Active)
            .unwrap();
        assert!(p
            .desk
            .create_booking_from_quote(&op.actor, quote.id, BookingTerms::default())
            .is_ok());
    }
}
