#![allow(dead_code)]

use chrono::{Duration, NaiveDate, Utc};
use uuid::Uuid;

use tripdesk_billing::PaymentConfirmation;
use tripdesk_core::{AppConfig, Currency, Money};
use tripdesk_engine::{SignupRequest, Tripdesk};
use tripdesk_finance::Customer;
use tripdesk_platform::validation::{CityNights, ItineraryRequest, TourType};
use tripdesk_platform::Actor;
use tripdesk_pricing::{ItemKind, NewItem};

pub const ITINERARY: &str = "itinerary_generation";

pub struct Platform {
    pub desk: Tripdesk,
    pub admin: Actor,
}

pub struct Operator {
    pub org: Uuid,
    pub actor: Actor,
}

pub fn eur(major: i64) -> Money {
    Money::from_major(major, Currency::Eur)
}

pub fn tl(major: i64) -> Money {
    Money::from_major(major, Currency::Try)
}

pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

pub fn platform() -> Platform {
    platform_with(AppConfig::default())
}

pub fn platform_with(config: AppConfig) -> Platform {
    let desk = Tripdesk::new(config);
    let root = desk
        .bootstrap_super_admin("root@tripdesk.example", "Platform", "Admin")
        .unwrap();
    let admin = desk.actor_for(root.id).unwrap();
    desk.set_usage_rate(&admin, ITINERARY, tl(50), Utc::now() - Duration::days(1))
        .unwrap();
    Platform { desk, admin }
}

impl Platform {
    pub fn operator(&self, subdomain: &str) -> Operator {
        let signup = self
            .desk
            .signup_operator(SignupRequest {
                organization_name: format!("{subdomain} travel"),
                subdomain: subdomain.into(),
                contact_email: format!("ops@{subdomain}.example"),
                default_currency: Some(Currency::Eur),
                trial: false,
                admin_email: format!("boss@{subdomain}.example"),
                admin_first_name: "Selin".into(),
                admin_last_name: "Kaya".into(),
            })
            .unwrap();
        Operator {
            org: signup.organization.id,
            actor: self.desk.actor_for(signup.admin.id).unwrap(),
        }
    }

    /// Buy credits and have the platform confirm the payment.
    pub fn fund(&self, op: &Operator, amount: Money) {
        let invoice = self.desk.purchase_credits(&op.actor, op.org, amount).unwrap();
        self.desk
            .mark_credit_invoice_paid(&self.admin, invoice.id, PaymentConfirmation::default())
            .unwrap();
    }

    /// A 4-star Istanbul hotel at 100 EUR and one 40 EUR city tour.
    pub fn stock_istanbul(&self, op: &Operator) {
        for (kind, name, stars, price) in [
            (ItemKind::Hotel, "Pera Palace", Some(4), 100),
            (ItemKind::Tour, "Old City Walk", None, 40),
        ] {
            self.desk
                .add_inventory_item(
                    &op.actor,
                    op.org,
                    NewItem {
                        kind,
                        name: name.into(),
                        city: "Istanbul".into(),
                        stars,
                        base_price: eur(price),
                    },
                )
                .unwrap();
        }
    }
}

pub fn customer() -> Customer {
    Customer {
        name: "Jane Traveller".into(),
        email: "jane@example.com".into(),
        phone: None,
    }
}

/// Two adults, two nights in Istanbul, starting in sixty days.
pub fn istanbul_request() -> ItineraryRequest {
    ItineraryRequest {
        city_nights: vec![CityNights {
            city: "Istanbul".into(),
            nights: 2,
        }],
        start_date: today() + Duration::days(60),
        adults: 2,
        children_ages: vec![],
        hotel_category: 4,
        tour_type: TourType::Sic,
        special_requests: None,
    }
}
