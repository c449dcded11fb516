//! Organization boundaries, roles, suspension and impersonation.

mod common;

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use tripdesk_billing::NewSubscription;
    use tripdesk_core::TripdeskError;
    use tripdesk_engine::{GenerateItinerary, SignupRequest};
    use tripdesk_platform::{AuditFilter, NewMember, Role};

    use crate::common::*;

    fn forbidden<T: std::fmt::Debug>(result: Result<T, TripdeskError>) -> bool {
        matches!(result, Err(TripdeskError::Forbidden(_)))
    }

    #[test]
    fn test_signup_creates_admin_and_account() {
        let p = platform();
        let op = p.operator("sunway");
        assert_eq!(op.actor.role, Role::OrgAdmin);
        assert_eq!(op.actor.organization_id, Some(op.org));

        let account = p.desk.credit_account(&op.actor, op.org).unwrap();
        assert!(account.balance.is_zero());
        assert_eq!(p.desk.team(&op.actor, op.org).unwrap().len(), 1);

        // duplicate admin email
        let again = p.desk.signup_operator(SignupRequest {
            organization_name: "Other".into(),
            subdomain: "other-travel".into(),
            contact_email: "ops@other.example".into(),
            default_currency: None,
            trial: true,
            admin_email: "boss@sunway.example".into(),
            admin_first_name: "Ali".into(),
            admin_last_name: "Veli".into(),
        });
        assert!(matches!(again, Err(TripdeskError::Conflict(_))));
    }

    #[test]
    fn test_operators_cannot_cross_organizations() {
        let p = platform();
        let sunway = p.operator("sunway");
        let lycia = p.operator("lycia");
        p.stock_istanbul(&sunway);
        p.fund(&sunway, tl(500));
        let quote = p
            .desk
            .generate_itinerary(
                &sunway.actor,
                sunway.org,
                GenerateItinerary {
                    request: istanbul_request(),
                    customer: customer(),
                    agent_id: None,
                    client_id: None,
                    itinerary_id: None,
                },
            )
            .unwrap();

        assert!(forbidden(p.desk.get_quote(&lycia.actor, quote.id)));
        assert!(forbidden(p.desk.send_quote(&lycia.actor, quote.id)));
        assert!(forbidden(p.desk.list_quotes(&lycia.actor, sunway.org, None)));
        assert!(forbidden(p.desk.credit_account(&lycia.actor, sunway.org)));
        // super admins see every organization
        assert!(p.desk.get_quote(&p.admin, quote.id).is_ok());
    }

    #[test]
    fn test_org_user_permissions() {
        let p = platform();
        let op = p.operator("sunway");
        let user = p
            .desk
            .add_team_member(
                &op.actor,
                op.org,
                NewMember {
                    email: "agent@sunway.example".into(),
                    first_name: "Deniz".into(),
                    last_name: "Arslan".into(),
                    role: Role::OrgUser,
                },
            )
            .unwrap();
        let member = p.desk.actor_for(user.id).unwrap();

        assert!(p.desk.list_quotes(&member, op.org, None).is_ok());
        assert!(forbidden(p.desk.purchase_credits(&member, op.org, tl(500))));
        assert!(forbidden(p.desk.team(&member, op.org)));
        assert!(forbidden(p.desk.change_member_role(&member, user.id, Role::OrgAdmin)));

        p.desk.disable_member(&op.actor, user.id).unwrap();
        assert!(p.desk.actor_for(user.id).is_err());
        p.desk.enable_member(&op.actor, user.id).unwrap();
        assert!(p.desk.actor_for(user.id).is_ok());
    }

    #[test]
    fn test_suspended_organization_is_read_only() {
        let p = platform();
        let op = p.operator("sunway");
        p.stock_istanbul(&op);

        p.desk.suspend_organization(&p.admin, op.org, "unpaid invoices").unwrap();
        assert!(forbidden(p.desk.purchase_credits(&op.actor, op.org, tl(500))));
        assert!(p.desk.list_quotes(&op.actor, op.org, None).is_ok());
        assert!(matches!(
            p.desk.impersonate(&p.admin, op.org),
            Err(TripdeskError::Conflict(_))
        ));

        p.desk.reactivate_organization(&p.admin, op.org, "settled").unwrap();
        assert!(p.desk.purchase_credits(&op.actor, op.org, tl(500)).is_ok());
    }

    #[test]
    fn test_impersonation_is_audited() {
        let p = platform();
        let op = p.operator("sunway");

        let imp = p.desk.impersonate(&p.admin, op.org).unwrap();
        assert_eq!(imp.actor.user_id, op.actor.user_id);
        assert_eq!(imp.actor.impersonated_by, Some(p.admin.user_id));

        // actions taken through the impersonated identity carry the admin id
        p.desk.purchase_credits(&imp.actor, op.org, tl(200)).unwrap();
        let trail = p
            .desk
            .audit_trail(
                &op.actor,
                AuditFilter {
                    action: Some("credit_purchase".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(trail.len(), 1);
        assert_eq!(trail[0].impersonated_by, Some(p.admin.user_id));

        let actions: Vec<String> = p
            .desk
            .audit_trail(&p.admin, AuditFilter::default())
            .unwrap()
            .into_iter()
            .map(|e| e.action)
            .collect();
        assert!(actions.contains(&"impersonate_start".to_string()));
    }

    #[test]
    fn test_platform_routes_need_super_admin() {
        let p = platform();
        let op = p.operator("sunway");
        assert!(forbidden(p.desk.list_tenants(&op.actor)));
        assert!(forbidden(p.desk.platform_stats(&op.actor)));
        assert!(forbidden(p.desk.verify_audit(&op.actor)));
        assert!(forbidden(p.desk.suspend_organization(&op.actor, op.org, "x")));
        assert!(forbidden(p.desk.create_subscription(
            &op.actor,
            op.org,
            NewSubscription {
                plan: "Growth".into(),
                monthly_credits: tl(300),
                price: tl(250),
            },
            Utc::now(),
        )));
        p.desk.suspend_organization(&p.admin, op.org, "unpaid").unwrap();
        assert!(forbidden(p.desk.create_subscription(
            &op.actor,
            op.org,
            NewSubscription {
                plan: "Growth".into(),
                monthly_credits: tl(300),
                price: tl(250),
            },
            Utc::now(),
        )));
        assert!(matches!(
            p.desk.bootstrap_super_admin("second@tripdesk.example", "Second", "Admin"),
            Err(TripdeskError::Conflict(_))
        ));
    }
}
