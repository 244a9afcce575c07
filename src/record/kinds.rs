//! Record kinds: the registry mapping kind tags to record types, and typed
//! views over the kinds the client works with directly.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;

use super::{FieldValue, ProxyList, Record};
use crate::cache::CacheRegistry;
use crate::error::{Error, Result};
use crate::util::kind_tag;

/// Which field identifies records of a kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdField {
  Id,
  Key,
}

impl IdField {
  pub fn name(&self) -> &'static str {
    match self {
      IdField::Id => "id",
      IdField::Key => "key",
    }
  }

  /// Identifier rule used for a kind tag.
  pub fn for_kind(tag: &str) -> Self {
    match tag {
      "user_field" | "organization_field" => IdField::Key,
      _ => IdField::Id,
    }
  }
}

/// Concrete record type: runtime name, canonical tag and identifier rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindSpec {
  type_name: String,
  tag: String,
  id_field: IdField,
}

impl KindSpec {
  pub fn new(type_name: &str, id_field: IdField) -> Self {
    Self {
      type_name: type_name.to_string(),
      tag: kind_tag(type_name),
      id_field,
    }
  }

  pub fn type_name(&self) -> &str {
    &self.type_name
  }

  pub fn tag(&self) -> &str {
    &self.tag
  }

  pub fn id_field(&self) -> IdField {
    self.id_field
  }
}

/// Record types known to the client.
const DEFAULT_KINDS: &[&str] = &[
  "Attachment",
  "Audit",
  "Automation",
  "Brand",
  "Comment",
  "CustomFieldOption",
  "Group",
  "GroupMembership",
  "Identity",
  "JobStatus",
  "JobStatusResult",
  "Macro",
  "MacroResult",
  "Organization",
  "OrganizationField",
  "OrganizationMembership",
  "Request",
  "SatisfactionRating",
  "SharingAgreement",
  "SlaPolicy",
  "Source",
  "SuspendedTicket",
  "Thumbnail",
  "Ticket",
  "TicketAudit",
  "TicketField",
  "TicketMetric",
  "Trigger",
  "User",
  "UserField",
  "Via",
  "View",
];

/// Tags that resolve to another kind's record type.
const DEFAULT_ALIASES: &[(&str, &str)] = &[("deleted_ticket", "ticket"), ("deleted_user", "user")];

/// Kind tag -> record type lookup used by the object mapper.
#[derive(Debug, Clone)]
pub struct KindRegistry {
  kinds: HashMap<String, KindSpec>,
}

impl KindRegistry {
  pub fn empty() -> Self {
    Self {
      kinds: HashMap::new(),
    }
  }

  /// Register a record type under its canonical tag.
  pub fn register(&mut self, type_name: &str) -> &mut Self {
    let tag = kind_tag(type_name);
    let spec = KindSpec::new(type_name, IdField::for_kind(&tag));
    self.kinds.insert(tag, spec);
    self
  }

  /// Make `alias` produce records of the kind registered as `target`.
  pub fn alias(&mut self, alias: &str, target: &str) -> Result<&mut Self> {
    let spec = self.lookup(target)?.clone();
    self.kinds.insert(alias.to_string(), spec);
    Ok(self)
  }

  pub fn contains(&self, tag: &str) -> bool {
    self.kinds.contains_key(tag)
  }

  pub fn lookup(&self, tag: &str) -> Result<&KindSpec> {
    self
      .kinds
      .get(tag)
      .ok_or_else(|| Error::mapping(tag, "unknown object kind"))
  }

  /// Create an empty record for `tag`.
  pub fn instantiate(&self, tag: &str) -> Result<Record> {
    Ok(Record::new(self.lookup(tag)?.clone()))
  }
}

impl Default for KindRegistry {
  fn default() -> Self {
    let mut registry = Self::empty();
    for type_name in DEFAULT_KINDS {
      registry.register(type_name);
    }
    for (alias, target) in DEFAULT_ALIASES {
      if let Some(spec) = registry.kinds.get(*target).cloned() {
        registry.kinds.insert(alias.to_string(), spec);
      }
    }
    registry
  }
}

// ============================================================================
// Typed views
// ============================================================================

/// Accessor pair for one field of a typed view.
macro_rules! field_accessor {
  (str, $get:ident, $set:ident, $field:literal) => {
    pub fn $get(&self) -> Option<String> {
      self.0.get_str($field)
    }

    pub fn $set(&self, value: impl Into<String>) {
      self.0.set($field, Value::String(value.into()));
    }
  };
  (i64, $get:ident, $set:ident, $field:literal) => {
    pub fn $get(&self) -> Option<i64> {
      self.0.get_i64($field)
    }

    pub fn $set(&self, value: i64) {
      self.0.set($field, Value::from(value));
    }
  };
  (bool, $get:ident, $set:ident, $field:literal) => {
    pub fn $get(&self) -> Option<bool> {
      self.0.get_bool($field)
    }

    pub fn $set(&self, value: bool) {
      self.0.set($field, Value::Bool(value));
    }
  };
  (list, $get:ident, $set:ident, $field:literal) => {
    pub fn $get(&self) -> Option<ProxyList> {
      self.0.list($field)
    }

    pub fn $set(&self, values: Vec<Value>) {
      self.0.set($field, Value::Array(values));
    }
  };
  (record, $get:ident, $set:ident, $field:literal) => {
    pub fn $get(&self) -> Option<Record> {
      self.0.record($field)
    }

    pub fn $set(&self, value: &Record) {
      self.0.set($field, value);
    }
  };
  (records, $get:ident, $set:ident, $field:literal) => {
    pub fn $get(&self) -> Vec<Record> {
      self.0.records($field)
    }

    pub fn $set(&self, values: Vec<Record>) {
      self.0.set($field, FieldValue::from(values));
    }
  };
  (datetime, $get:ident, $set:ident, $field:literal) => {
    pub fn $get(&self) -> Option<DateTime<Utc>> {
      self.0.datetime($field)
    }

    pub fn $set(&self, value: DateTime<Utc>) {
      self.0.set_datetime($field, value);
    }
  };
  // Related record behind `<name>_id`, resolved through the cache.
  (related $kind:literal, $get:ident, $set:ident, $name:literal) => {
    pub fn $get(&self, cache: &CacheRegistry) -> Option<Record> {
      self.0.related($name, $kind, cache)
    }

    pub fn $set(&self, value: &Record) {
      self.0.set_related($name, value);
    }
  };
}

/// Define a typed view over [`Record`] for one kind.
macro_rules! record_kind {
  (
    $(#[$meta:meta])*
    $name:ident {
      $( $ty:ident $($kind:literal)?: $get:ident / $set:ident => $field:literal, )*
    }
  ) => {
    $(#[$meta])*
    #[derive(Debug, Clone)]
    pub struct $name(Record);

    impl $name {
      pub const TYPE_NAME: &'static str = stringify!($name);

      pub fn new() -> Self {
        Self(Record::new(Self::spec()))
      }

      pub fn spec() -> KindSpec {
        KindSpec::new(Self::TYPE_NAME, IdField::for_kind(&kind_tag(Self::TYPE_NAME)))
      }

      /// View an existing record; fails when it belongs to another kind.
      pub fn from_record(record: Record) -> Result<Self> {
        if record.type_name() != Self::TYPE_NAME {
          return Err(Error::TypeMismatch {
            expected: kind_tag(Self::TYPE_NAME),
            found: record.kind().to_string(),
          });
        }
        Ok(Self(record))
      }

      pub fn record(&self) -> &Record {
        &self.0
      }

      pub fn into_record(self) -> Record {
        self.0
      }

      $( field_accessor!($ty $($kind)?, $get, $set, $field); )*
    }

    impl Default for $name {
      fn default() -> Self {
        Self::new()
      }
    }

    impl From<$name> for Record {
      fn from(view: $name) -> Record {
        view.0
      }
    }
  };
}

record_kind! {
  /// A support ticket.
  Ticket {
    i64: id / set_id => "id",
    str: subject / set_subject => "subject",
    str: description / set_description => "description",
    str: status / set_status => "status",
    str: priority / set_priority => "priority",
    i64: requester_id / set_requester_id => "requester_id",
    i64: assignee_id / set_assignee_id => "assignee_id",
    i64: organization_id / set_organization_id => "organization_id",
    list: tags / set_tags => "tags",
    list: custom_fields / set_custom_fields => "custom_fields",
    record: via / set_via => "via",
    record: comment / set_comment => "comment",
    datetime: created / set_created => "created_at",
    datetime: updated / set_updated => "updated_at",
    datetime: due / set_due => "due_at",
    related "user": requester / set_requester => "requester",
    related "user": assignee / set_assignee => "assignee",
    related "organization": organization / set_organization => "organization",
  }
}

record_kind! {
  /// An end user or agent.
  User {
    i64: id / set_id => "id",
    str: name / set_name => "name",
    str: email / set_email => "email",
    str: role / set_role => "role",
    i64: organization_id / set_organization_id => "organization_id",
    list: tags / set_tags => "tags",
    bool: suspended / set_suspended => "suspended",
    datetime: created / set_created => "created_at",
    related "organization": organization / set_organization => "organization",
  }
}

record_kind! {
  Organization {
    i64: id / set_id => "id",
    str: name / set_name => "name",
    list: domain_names / set_domain_names => "domain_names",
    datetime: created / set_created => "created_at",
  }
}

record_kind! {
  /// One audit entry of a ticket.
  Audit {
    i64: id / set_id => "id",
    i64: ticket_id / set_ticket_id => "ticket_id",
    i64: author_id / set_author_id => "author_id",
    list: events / set_events => "events",
    record: via / set_via => "via",
    datetime: created / set_created => "created_at",
    related "ticket": ticket / set_ticket => "ticket",
    related "user": author / set_author => "author",
  }
}

record_kind! {
  /// Ticket plus the audit produced by the write that returned it.
  TicketAudit {
    record: ticket / set_ticket => "ticket",
    record: audit / set_audit => "audit",
  }
}

record_kind! {
  Comment {
    i64: id / set_id => "id",
    str: body / set_body => "body",
    bool: public / set_public => "public",
    i64: author_id / set_author_id => "author_id",
    records: attachments / set_attachments => "attachments",
    datetime: created / set_created => "created_at",
  }
}

record_kind! {
  /// Background job tracking a bulk operation.
  JobStatus {
    str: id / set_id => "id",
    str: status / set_status => "status",
    i64: progress / set_progress => "progress",
    i64: total / set_total => "total",
    records: results / set_results => "results",
  }
}

record_kind! {
  /// How a ticket or audit was created.
  Via {
    str: channel / set_channel => "channel",
    record: source / set_source => "source",
  }
}
