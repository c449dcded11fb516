//! Client register, inbound customer requests through to a priced quote,
//! and the organization analytics built on top of them.

mod common;

#[cfg(test)]
mod tests {
    use tripdesk_core::TripdeskError;
    use tripdesk_engine::{BookingTerms, GenerateItinerary};
    use tripdesk_finance::{
        ClientFilter, ClientSource, NewClient, NewCustomerRequest, QuoteStatus, RequestStatus,
    };
    use tripdesk_platform::AuditFilter;
    use tripdesk_pricing::catalog::ItemFilter;

    use crate::common::*;

    fn new_client(name: &str, source: ClientSource) -> NewClient {
        NewClient {
            name: name.into(),
            email: Some(format!("{}@example.com", name.to_lowercase().replace(' ', "."))),
            source,
            ..Default::default()
        }
    }

    fn enquiry(client_id: Option<uuid::Uuid>) -> NewCustomerRequest {
        NewCustomerRequest {
            customer: customer(),
            itinerary: istanbul_request(),
            client_id,
            agent_id: None,
            notes: None,
        }
    }

    #[test]
    fn test_client_spend_comes_from_accepted_quotes() {
        let p = platform();
        let op = p.operator("sunway");
        p.stock_istanbul(&op);
        p.fund(&op, tl(500));

        let client = p
            .desk
            .add_client(&op.actor, op.org, new_client("Jane Traveller", ClientSource::Website))
            .unwrap();
        p.desk
            .add_client(&op.actor, op.org, new_client("Ken Sato", ClientSource::Referral))
            .unwrap();

        let quote = p
            .desk
            .generate_itinerary(
                &op.actor,
                op.org,
                GenerateItinerary {
                    request: istanbul_request(),
                    customer: customer(),
                    agent_id: None,
                    client_id: Some(client.id),
                    itinerary_id: None,
                },
            )
            .unwrap();
        assert_eq!(quote.client_id, Some(client.id));

        let before = p.desk.get_client(&op.actor, client.id).unwrap();
        assert_eq!(before.total_quotes, 1);
        assert_eq!(before.total_spent, eur(0));

        p.desk.send_quote(&op.actor, quote.id).unwrap();
        p.desk.accept_quote(&op.actor, quote.id).unwrap();
        let after = p.desk.get_client(&op.actor, client.id).unwrap();
        assert_eq!(after.total_spent, eur(480));

        let register = p
            .desk
            .list_clients(
                &op.actor,
                op.org,
                &ClientFilter {
                    search: Some("jane".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(register.clients.len(), 1);
        assert_eq!(register.counts.total, 2);
        assert_eq!(register.counts.website, 1);
        assert_eq!(register.counts.referral, 1);
    }

    #[test]
    fn test_client_with_history_cannot_be_removed() {
        let p = platform();
        let op = p.operator("sunway");
        let client = p
            .desk
            .add_client(&op.actor, op.org, new_client("Jane Traveller", ClientSource::Direct))
            .unwrap();
        p.desk
            .submit_customer_request(&op.actor, op.org, enquiry(Some(client.id)))
            .unwrap();

        assert!(matches!(
            p.desk.remove_client(&op.actor, client.id),
            Err(TripdeskError::Conflict(_))
        ));

        let idle = p
            .desk
            .add_client(&op.actor, op.org, new_client("Ken Sato", ClientSource::Direct))
            .unwrap();
        p.desk.remove_client(&op.actor, idle.id).unwrap();
        assert!(p.desk.get_client(&op.actor, idle.id).is_err());

        let deletes = p
            .desk
            .audit_trail(
                &p.admin,
                AuditFilter {
                    organization_id: Some(op.org),
                    action: Some("client_delete".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(deletes.len(), 1);
    }

    #[test]
    fn test_clients_stay_inside_their_organization() {
        let p = platform();
        let sunway = p.operator("sunway");
        let rival = p.operator("rival");
        p.stock_istanbul(&sunway);
        p.fund(&sunway, tl(500));

        let foreign = p
            .desk
            .add_client(&rival.actor, rival.org, new_client("Ken Sato", ClientSource::Direct))
            .unwrap();
        assert!(p.desk.get_client(&sunway.actor, foreign.id).is_err());
        assert!(p
            .desk
            .submit_customer_request(&sunway.actor, sunway.org, enquiry(Some(foreign.id)))
            .is_err());

        let err = p
            .desk
            .generate_itinerary(
                &sunway.actor,
                sunway.org,
                GenerateItinerary {
                    request: istanbul_request(),
                    customer: customer(),
                    agent_id: None,
                    client_id: Some(foreign.id),
                    itinerary_id: None,
                },
            )
            .unwrap_err();
        assert!(matches!(err, TripdeskError::NotFound { .. }));
        // nothing charged for the refused generation
        assert_eq!(p.desk.credit_account(&sunway.actor, sunway.org).unwrap().balance, tl(500));
    }

    #[test]
    fn test_request_is_quoted_once_and_followed_through() {
        let p = platform();
        let op = p.operator("sunway");
        p.stock_istanbul(&op);
        p.fund(&op, tl(500));

        let request = p.desk.submit_customer_request(&op.actor, op.org, enquiry(None)).unwrap();
        assert_eq!(request.status, RequestStatus::Pending);
        assert!(request.reference.starts_with("REQ-"));

        let (quoted, quote) = p.desk.quote_customer_request(&op.actor, request.id).unwrap();
        assert_eq!(quoted.status, RequestStatus::Quoted);
        assert_eq!(quoted.quote_id, Some(quote.id));
        assert_eq!(quote.total, eur(480));

        let (_, again) = p.desk.quote_customer_request(&op.actor, request.id).unwrap();
        assert_eq!(again.id, quote.id);
        assert_eq!(p.desk.credit_account(&op.actor, op.org).unwrap().balance, tl(450));

        p.desk.confirm_customer_request(&op.actor, request.id).unwrap();
        let done = p.desk.complete_customer_request(&op.actor, request.id).unwrap();
        assert_eq!(done.status, RequestStatus::Completed);

        let other = p.desk.submit_customer_request(&op.actor, op.org, enquiry(None)).unwrap();
        let cancelled = p
            .desk
            .cancel_customer_request(&op.actor, other.id, Some("dates moved".into()))
            .unwrap();
        assert!(matches!(
            p.desk.quote_customer_request(&op.actor, cancelled.id),
            Err(TripdeskError::InvalidTransition { .. })
        ));

        let (requests, stats) = p.desk.list_customer_requests(&op.actor, op.org, None).unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.cancelled, 1);
    }

    #[test]
    fn test_recalculate_reprices_only_draft_quotes() {
        let p = platform();
        let op = p.operator("sunway");
        p.stock_istanbul(&op);
        p.fund(&op, tl(500));

        let draft = p.desk.submit_customer_request(&op.actor, op.org, enquiry(None)).unwrap();
        let sent = p.desk.submit_customer_request(&op.actor, op.org, enquiry(None)).unwrap();
        let (_, draft_quote) = p.desk.quote_customer_request(&op.actor, draft.id).unwrap();
        let (_, sent_quote) = p.desk.quote_customer_request(&op.actor, sent.id).unwrap();
        p.desk.send_quote(&op.actor, sent_quote.id).unwrap();

        let hotel = p
            .desk
            .inventory(&op.actor, op.org, &ItemFilter::default())
            .unwrap()
            .into_iter()
            .find(|i| i.name == "Pera Palace")
            .unwrap();
        p.desk.update_item_price(&op.actor, hotel.id, eur(120)).unwrap();

        let report = p.desk.recalculate_customer_requests(&op.actor, op.org).unwrap();
        assert_eq!(report.total, 1);
        assert_eq!(report.updated, 1);
        assert!(report.errors.is_empty());

        // hotel 120 x 2 nights x 2 adults + tour 40 x 2 adults
        assert_eq!(p.desk.get_quote(&op.actor, draft_quote.id).unwrap().total, eur(560));
        let untouched = p.desk.get_quote(&op.actor, sent_quote.id).unwrap();
        assert_eq!(untouched.status, QuoteStatus::Sent);
        assert_eq!(untouched.total, eur(480));
    }

    #[test]
    fn test_analytics_counts_conversion_and_destinations() {
        let p = platform();
        let op = p.operator("sunway");
        p.stock_istanbul(&op);
        p.fund(&op, tl(500));

        let generate = || GenerateItinerary {
            request: istanbul_request(),
            customer: customer(),
            agent_id: None,
            client_id: None,
            itinerary_id: None,
        };
        let booked = p.desk.generate_itinerary(&op.actor, op.org, generate()).unwrap();
        p.desk.generate_itinerary(&op.actor, op.org, generate()).unwrap();
        p.desk.send_quote(&op.actor, booked.id).unwrap();
        p.desk
            .create_booking_from_quote(&op.actor, booked.id, BookingTerms::default())
            .unwrap();

        let analytics = p.desk.organization_analytics(&op.actor, op.org).unwrap();
        assert_eq!(analytics.total_quotes, 2);
        assert_eq!(analytics.open_quotes, 1);
        assert_eq!(analytics.accepted_quotes, 1);
        assert_eq!(analytics.total_bookings, 1);
        assert_eq!(analytics.conversion_rate_bps, 5_000);
        assert_eq!(analytics.booked_revenue, eur(480));
        assert_eq!(analytics.travellers_booked, 2);

        let istanbul = &analytics.top_destinations[0];
        assert_eq!(istanbul.destination, "Istanbul");
        assert_eq!(istanbul.quotes, 2);
        assert_eq!(istanbul.accepted, 1);
        assert_eq!(istanbul.total_value, eur(960));

        assert_eq!(analytics.monthly_revenue.len(), 6);
        let current = analytics.monthly_revenue.last().unwrap();
        assert_eq!(current.bookings, 1);
        assert_eq!(current.revenue, eur(480));

        let rival = p.operator("rival");
        assert!(p.desk.organization_analytics(&rival.actor, op.org).is_err());
    }
}
