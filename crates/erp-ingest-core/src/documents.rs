// crates/erp-ingest-core/src/documents.rs
// ============================================================================
// Module: Document Specs
// Description: Shipped mapping specs and the transformer registry.
// Purpose: Declare client -> canonical -> target shapes per (resource, profile).
// Dependencies: serde_json, thiserror
// ============================================================================

//! ## Overview
//! Each [`DocumentTransformer`] pairs a client-to-canonical spec with a
//! canonical-to-target spec and names the downstream collection. The
//! [`TransformerRegistry`] is built once at startup and shared read-only.
//!
//! Shipped resources, both under the `default` profile:
//! - `invoice` -> `Invoices`
//! - `business_partner` -> `BusinessPartners`

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::json;
use thiserror::Error;

use crate::mapping::FieldSpec;
use crate::mapping::MappingSpec;
use crate::mapping::Transform;
use crate::mapping::ValueKind;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default mapping profile.
pub const DEFAULT_PROFILE: &str = "default";
/// Invoice resource name.
pub const INVOICE_RESOURCE: &str = "invoice";
/// Business partner resource name.
pub const BUSINESS_PARTNER_RESOURCE: &str = "business_partner";

// ============================================================================
// SECTION: Registry
// ============================================================================

/// Two-stage transformer for one (resource, profile).
#[derive(Debug, Clone)]
pub struct DocumentTransformer {
    /// Resource name.
    pub resource: String,
    /// Profile name.
    pub profile: String,
    /// Downstream collection receiving the target document.
    pub collection: String,
    /// Client -> canonical spec.
    pub to_canonical: Arc<MappingSpec>,
    /// Canonical -> target spec.
    pub to_target: Arc<MappingSpec>,
}

/// Registry lookup and registration failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// No transformer for (resource, profile).
    #[error("no transformer registered for resource '{resource}' and profile '{profile}'")]
    Unknown {
        /// Requested resource.
        resource: String,
        /// Requested profile.
        profile: String,
    },
    /// A transformer is already registered for (resource, profile).
    #[error("transformer already registered for resource '{resource}' and profile '{profile}'")]
    Duplicate {
        /// Resource name.
        resource: String,
        /// Profile name.
        profile: String,
    },
}

/// Transformers keyed by (resource, profile).
#[derive(Debug, Clone, Default)]
pub struct TransformerRegistry {
    /// Registered transformers.
    entries: BTreeMap<(String, String), Arc<DocumentTransformer>>,
}

impl TransformerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the shipped invoice and business partner specs.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut entries = BTreeMap::new();
        for transformer in [invoice_transformer(), business_partner_transformer()] {
            entries.insert(
                (transformer.resource.clone(), transformer.profile.clone()),
                Arc::new(transformer),
            );
        }
        Self {
            entries,
        }
    }

    /// Registers a transformer.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Duplicate`] when the pair is taken.
    pub fn register(&mut self, transformer: DocumentTransformer) -> Result<(), RegistryError> {
        let key = (transformer.resource.clone(), transformer.profile.clone());
        if self.entries.contains_key(&key) {
            return Err(RegistryError::Duplicate {
                resource: key.0,
                profile: key.1,
            });
        }
        self.entries.insert(key, Arc::new(transformer));
        Ok(())
    }

    /// Looks up the transformer for (resource, profile).
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Unknown`] when nothing is registered.
    pub fn get(
        &self,
        resource: &str,
        profile: &str,
    ) -> Result<Arc<DocumentTransformer>, RegistryError> {
        self.entries.get(&(resource.to_string(), profile.to_string())).cloned().ok_or_else(|| {
            RegistryError::Unknown {
                resource: resource.to_string(),
                profile: profile.to_string(),
            }
        })
    }

    /// Returns registered (resource, profile) pairs in order.
    pub fn keys(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.keys().map(|(resource, profile)| (resource.as_str(), profile.as_str()))
    }
}

// ============================================================================
// SECTION: Invoice
// ============================================================================

/// Invoice transformer for the default profile.
#[must_use]
pub fn invoice_transformer() -> DocumentTransformer {
    let client_line = MappingSpec::new("invoice.canonical.line")
        .field(FieldSpec::value("item_code", "sku").kind(ValueKind::String).required())
        .field(FieldSpec::value("quantity", "qty").kind(ValueKind::Number).required())
        .field(FieldSpec::value("price", "unit_price").kind(ValueKind::Number).required())
        .field(FieldSpec::value("warehouse_code", "whs").kind(ValueKind::String))
        .field(FieldSpec::value("tax_code", "tax_code").kind(ValueKind::String))
        .shared();
    let to_canonical = MappingSpec::new("invoice.canonical")
        .field(FieldSpec::value("card_code", "customer_code").kind(ValueKind::String).required())
        .field(
            FieldSpec::value("currency", "currency")
                .kind(ValueKind::String)
                .required()
                .default_value(json!("USD")),
        )
        .field(FieldSpec::value("doc_date", "doc_date").kind(ValueKind::String))
        .field(FieldSpec::many("lines", "lines", client_line))
        .shared();

    let target_line = MappingSpec::new("invoice.target.line")
        .field(FieldSpec::value("ItemCode", "item_code").kind(ValueKind::String).required())
        .field(FieldSpec::value("Quantity", "quantity").kind(ValueKind::Number).required())
        .field(FieldSpec::value("UnitPrice", "price").kind(ValueKind::Number).required())
        .field(FieldSpec::value("WarehouseCode", "warehouse_code").kind(ValueKind::String))
        .field(FieldSpec::value("TaxCode", "tax_code").kind(ValueKind::String))
        .omit_nulls()
        .shared();
    let to_target = MappingSpec::new("invoice.target")
        .field(FieldSpec::value("CardCode", "card_code").kind(ValueKind::String).required())
        .field(FieldSpec::value("DocCurrency", "currency").kind(ValueKind::String))
        .field(FieldSpec::value("DocDate", "doc_date").kind(ValueKind::String))
        .field(FieldSpec::many("DocumentLines", "lines", target_line))
        .omit_nulls()
        .shared();

    DocumentTransformer {
        resource: INVOICE_RESOURCE.to_string(),
        profile: DEFAULT_PROFILE.to_string(),
        collection: "Invoices".to_string(),
        to_canonical,
        to_target,
    }
}

// ============================================================================
// SECTION: Business Partner
// ============================================================================

/// Business partner transformer for the default profile.
#[must_use]
pub fn business_partner_transformer() -> DocumentTransformer {
    let client_contact = MappingSpec::new("business_partner.canonical.contact")
        .field(text("name", "lname").required())
        .field(text("address", "laddress").required())
        .field(text("e_mail", "le_mail"))
        .field(text("phone_1", "lphone_1"))
        .shared();
    let client_address = MappingSpec::new("business_partner.canonical.address")
        .field(text("address_name", "laddress_name").required())
        .field(text("address_name_2", "laddress_name_2"))
        .field(text("address_name_3", "laddress_name_3"))
        .field(text("address_type", "laddress_type").required())
        .field(text("county", "lcounty").required())
        .field(text("country", "lcountry").required())
        .field(text("state", "lstate").required())
        .field(text("zipcode", "lzipcode"))
        .field(text("building_floor_room", "lbuilding_floor_room").required())
        .field(text("street", "lstreet").required())
        .field(text("block", "lblock").required())
        .field(text("city", "lcity").required())
        .shared();
    let to_canonical = MappingSpec::new("business_partner.canonical")
        .field(text("card_code", "lcard_code").required())
        .field(text("card_name", "lcard_name").required())
        .field(text("card_foreign_name", "lcard_foreign_name").required())
        .field(text("card_type", "lcard_type").required())
        .field(
            FieldSpec::value("group_code", "lgroup_code")
                .kind(ValueKind::Integer)
                .transform(Transform::ToInteger)
                .required(),
        )
        .field(text("federal_tax_id", "lfederal_tax_id"))
        .field(text("additional_id", "ladditional_id").required())
        .field(text("unified_federal_tax_id", "lunified_federal_tax_id"))
        .field(text("country", "lcountry").required())
        .field(text("u_tipo_cont", "lu_tipo_cont"))
        .field(text("u_tipo_sn", "lu_tipo_sn"))
        .field(text("u_doc_identificacion", "lu_doc_identificacion"))
        .field(
            FieldSpec::value("sales_person_code", "lsales_person_code")
                .kind(ValueKind::String)
                .transform(Transform::ToString),
        )
        .field(FieldSpec::many("contact_employees", "lcontact_employees", client_contact))
        .field(FieldSpec::many("bp_addresses", "lbp_addresses", client_address))
        .field(text("notes", "lnotes"))
        .shared();

    let target_contact = MappingSpec::new("business_partner.target.contact")
        .field(text("Name", "name").required())
        .field(text("Address", "address").required())
        .field(text("E_Mail", "e_mail"))
        .field(text("Phone1", "phone_1"))
        .omit_nulls()
        .shared();
    let target_address = MappingSpec::new("business_partner.target.address")
        .field(text("AddressName", "address_name").required())
        .field(text("AddressName2", "address_name_2"))
        .field(text("AddressName3", "address_name_3"))
        .field(text("AddressType", "address_type").required())
        .field(text("County", "county").required())
        .field(text("Country", "country").required())
        .field(text("State", "state").required())
        .field(text("ZipCode", "zipcode"))
        .field(text("BuildingFloorRoom", "building_floor_room").required())
        .field(text("Street", "street").required())
        .field(text("Block", "block").required())
        .field(text("City", "city").required())
        .omit_nulls()
        .shared();
    let to_target = MappingSpec::new("business_partner.target")
        .field(text("CardCode", "card_code").required())
        .field(text("CardName", "card_name").required())
        .field(text("CardForeignName", "card_foreign_name").required())
        .field(text("CardType", "card_type").required())
        .field(FieldSpec::value("GroupCode", "group_code").kind(ValueKind::Integer).required())
        .field(text("FederalTaxID", "federal_tax_id"))
        .field(text("AdditionalID", "additional_id").required())
        .field(text("UnifiedFederalTaxID", "unified_federal_tax_id"))
        .field(text("Country", "country").required())
        .field(text("U_TipoCont", "u_tipo_cont"))
        .field(text("U_TipoSN", "u_tipo_sn"))
        .field(text("U_DocIdentificacion", "u_doc_identificacion"))
        .field(
            FieldSpec::value("SalesPersonCode", "sales_person_code")
                .kind(ValueKind::Integer)
                .transform(Transform::ToInteger),
        )
        .field(FieldSpec::many("ContactEmployees", "contact_employees", target_contact))
        .field(FieldSpec::many("BPAddresses", "bp_addresses", target_address))
        .field(text("Notes", "notes"))
        .omit_nulls()
        .shared();

    DocumentTransformer {
        resource: BUSINESS_PARTNER_RESOURCE.to_string(),
        profile: DEFAULT_PROFILE.to_string(),
        collection: "BusinessPartners".to_string(),
        to_canonical,
        to_target,
    }
}

/// Declares a string field.
fn text(name: &str, source: &str) -> FieldSpec {
    FieldSpec::value(name, source).kind(ValueKind::String)
}
