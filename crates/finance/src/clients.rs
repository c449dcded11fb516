//! The organization's client register.
//!
//! A client is a traveller or travelling party the operator deals with
//! repeatedly. Quotes and customer requests may point at a client; spend
//! figures are derived from those records rather than stored here.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use tripdesk_core::{TripdeskError, TripdeskResult};
use tripdesk_platform::validation::{is_valid_email, is_valid_name, is_valid_phone};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientSource {
    #[default]
    Direct,
    Agent,
    Website,
    Referral,
}

impl FromStr for ClientSource {
    type Err = TripdeskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "direct" => Ok(Self::Direct),
            "agent" => Ok(Self::Agent),
            "website" => Ok(Self::Website),
            "referral" => Ok(Self::Referral),
            other => Err(TripdeskError::validation(format!("unknown client source '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
    pub id: Uuid,
    pub organization_id: Uuid,
    /// Sub-agent that brought the client in.
    pub agent_id: Option<Uuid>,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub country: Option<String>,
    pub nationality: Option<String>,
    pub source: ClientSource,
    pub tags: Vec<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct NewClient {
    pub agent_id: Option<Uuid>,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub country: Option<String>,
    pub nationality: Option<String>,
    pub source: ClientSource,
    pub tags: Vec<String>,
    pub notes: Option<String>,
}

/// Fields left `None` keep their current value.
#[derive(Debug, Clone, Default)]
pub struct ClientUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub country: Option<String>,
    pub nationality: Option<String>,
    pub tags: Option<Vec<String>>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ClientFilter {
    pub source: Option<ClientSource>,
    pub agent_id: Option<Uuid>,
    /// Case-insensitive match on name, email or phone.
    pub search: Option<String>,
}

impl ClientFilter {
    fn matches(&self, client: &Client) -> bool {
        if self.source.is_some_and(|s| s != client.source) {
            return false;
        }
        if self.agent_id.is_some_and(|a| client.agent_id != Some(a)) {
            return false;
        }
        match self.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            None => true,
            Some(needle) => {
                let needle = needle.to_lowercase();
                [Some(&client.name), client.email.as_ref(), client.phone.as_ref()]
                    .into_iter()
                    .flatten()
                    .any(|field| field.to_lowercase().contains(&needle))
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSourceCounts {
    pub total: usize,
    pub direct: usize,
    pub agent: usize,
    pub website: usize,
    pub referral: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientState {
    pub clients: Vec<Client>,
}

fn check_contact(email: Option<&str>, phone: Option<&str>) -> TripdeskResult<()> {
    if let Some(email) = email {
        if !is_valid_email(email) {
            return Err(TripdeskError::validation(format!("invalid client email '{email}'")));
        }
    }
    if let Some(phone) = phone {
        if !is_valid_phone(phone) {
            return Err(TripdeskError::validation(format!("invalid client phone '{phone}'")));
        }
    }
    Ok(())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

pub struct ClientBook {
    clients: DashMap<Uuid, Client>,
}

impl Default for ClientBook {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientBook {
    pub fn new() -> Self {
        Self {
            clients: DashMap::new(),
        }
    }

    pub fn from_state(state: ClientState) -> Self {
        let book = Self::new();
        for client in state.clients {
            book.clients.insert(client.id, client);
        }
        book
    }

    pub fn export(&self) -> ClientState {
        let mut clients: Vec<Client> = self.clients.iter().map(|e| e.value().clone()).collect();
        clients.sort_by_key(|c| (c.created_at, c.id));
        ClientState { clients }
    }

    pub fn add(&self, organization_id: Uuid, new: NewClient) -> TripdeskResult<Client> {
        let name = new.name.trim().to_string();
        if !is_valid_name(&name) {
            return Err(TripdeskError::validation("client name is required (1-100 characters)"));
        }
        let email = non_empty(new.email);
        let phone = non_empty(new.phone);
        check_contact(email.as_deref(), phone.as_deref())?;
        if new.source == ClientSource::Agent && new.agent_id.is_none() {
            return Err(TripdeskError::validation("an agent-sourced client needs an agent"));
        }

        let now = Utc::now();
        let client = Client {
            id: Uuid::new_v4(),
            organization_id,
            agent_id: new.agent_id,
            name,
            email,
            phone,
            country: non_empty(new.country),
            nationality: non_empty(new.nationality),
            source: new.source,
            tags: new.tags.into_iter().filter_map(|t| non_empty(Some(t))).collect(),
            notes: non_empty(new.notes),
            created_at: now,
            updated_at: now,
        };
        self.clients.insert(client.id, client.clone());
        metrics::counter!("clients.created").increment(1);
        info!(org_id = %organization_id, client_id = %client.id, source = ?client.source, "Client added");
        Ok(client)
    }

    pub fn get(&self, id: Uuid) -> TripdeskResult<Client> {
        self.clients
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or_else(|| TripdeskError::not_found("client", id))
    }

    /// Matching clients, newest first.
    pub fn list(&self, organization_id: Uuid, filter: &ClientFilter) -> Vec<Client> {
        let mut clients: Vec<Client> = self
            .clients
            .iter()
            .filter(|e| e.value().organization_id == organization_id && filter.matches(e.value()))
            .map(|e| e.value().clone())
            .collect();
        clients.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.name.cmp(&b.name)));
        clients
    }

    pub fn update(&self, id: Uuid, update: ClientUpdate) -> TripdeskResult<Client> {
        let mut client = self
            .clients
            .get_mut(&id)
            .ok_or_else(|| TripdeskError::not_found("client", id))?;
        if let Some(ref name) = update.name {
            if !is_valid_name(name.trim()) {
                return Err(TripdeskError::validation("client name is required (1-100 characters)"));
            }
        }
        let email = non_empty(update.email);
        let phone = non_empty(update.phone);
        check_contact(email.as_deref(), phone.as_deref())?;

        if let Some(name) = update.name {
            client.name = name.trim().to_string();
        }
        if email.is_some() {
            client.email = email;
        }
        if phone.is_some() {
            client.phone = phone;
        }
        if let Some(country) = non_empty(update.country) {
            client.country = Some(country);
        }
        if let Some(nationality) = non_empty(update.nationality) {
            client.nationality = Some(nationality);
        }
        if let Some(tags) = update.tags {
            client.tags = tags.into_iter().filter_map(|t| non_empty(Some(t))).collect();
        }
        if let Some(notes) = non_empty(update.notes) {
            client.notes = Some(notes);
        }
        client.updated_at = Utc::now();
        Ok(client.clone())
    }

    pub fn remove(&self, id: Uuid) -> TripdeskResult<Client> {
        self.clients
            .remove(&id)
            .map(|(_, client)| client)
            .ok_or_else(|| TripdeskError::not_found("client", id))
    }

    pub fn source_counts(&self, organization_id: Uuid) -> ClientSourceCounts {
        let mut counts = ClientSourceCounts::default();
        for e in self.clients.iter().filter(|e| e.value().organization_id == organization_id) {
            counts.total += 1;
            match e.value().source {
                ClientSource::Direct => counts.direct += 1,
                ClientSource::Agent => counts.agent += 1,
                ClientSource::Website => counts.website += 1,
                ClientSource::Referral => counts.referral += 1,
            }
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(name: &str, email: Option<&str>, source: ClientSource) -> NewClient {
        NewClient {
            name: name.into(),
            email: email.map(String::from),
            source,
            agent_id: (source == ClientSource::Agent).then(Uuid::new_v4),
            ..Default::default()
        }
    }

    #[test]
    fn test_add_validates_contact() {
        let book = ClientBook::new();
        let org = Uuid::new_v4();
        assert!(book.add(org, client("  ", None, ClientSource::Direct)).is_err());
        assert!(book.add(org, client("Ayse Demir", Some("not-an-email"), ClientSource::Direct)).is_err());
        assert!(book
            .add(
                org,
                NewClient {
                    name: "No Agent".into(),
                    source: ClientSource::Agent,
                    ..Default::default()
                }
            )
            .is_err());

        let added = book
            .add(
                org,
                NewClient {
                    name: " Ayse Demir ".into(),
                    phone: Some("+90 532 000 11 22".into()),
                    tags: vec!["vip".into(), " ".into()],
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(added.name, "Ayse Demir");
        assert_eq!(added.tags, vec!["vip".to_string()]);
        assert!(added.email.is_none());
    }

    #[test]
    fn test_search_and_source_filter() {
        let book = ClientBook::new();
        let org = Uuid::new_v4();
        book.add(org, client("John Smith", Some("john@example.com"), ClientSource::Direct)).unwrap();
        book.add(org, client("Maria Lopez", Some("maria@viajes.example"), ClientSource::Agent)).unwrap();
        book.add(org, client("Ken Sato", None, ClientSource::Website)).unwrap();
        book.add(Uuid::new_v4(), client("John Other", None, ClientSource::Direct)).unwrap();

        let search = ClientFilter {
            search: Some("JOHN".into()),
            ..Default::default()
        };
        assert_eq!(book.list(org, &search).len(), 1);

        let by_email = ClientFilter {
            search: Some("viajes".into()),
            ..Default::default()
        };
        assert_eq!(book.list(org, &by_email)[0].name, "Maria Lopez");

        let agents = ClientFilter {
            source: Some(ClientSource::Agent),
            ..Default::default()
        };
        assert_eq!(book.list(org, &agents).len(), 1);

        let counts = book.source_counts(org);
        assert_eq!(
            counts,
            ClientSourceCounts {
                total: 3,
                direct: 1,
                agent: 1,
                website: 1,
                referral: 0,
            }
        );
    }

    #[test]
    fn test_update_keeps_unset_fields() {
        let book = ClientBook::new();
        let added = book
            .add(Uuid::new_v4(), client("John Smith", Some("john@example.com"), ClientSource::Referral))
            .unwrap();
        let updated = book
            .update(
                added.id,
                ClientUpdate {
                    country: Some("United Kingdom".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.email.as_deref(), Some("john@example.com"));
        assert_eq!(updated.country.as_deref(), Some("United Kingdom"));
        assert!(book
            .update(
                added.id,
                ClientUpdate {
                    email: Some("broken".into()),
                    ..Default::default()
                }
            )
            .is_err());
        assert_eq!("website".parse::<ClientSource>().unwrap(), ClientSource::Website);
    }
}
