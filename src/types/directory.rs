/// Capability data handed to the router that renders the directory resource.
/// Endpoint locations are the router's business, so none appear here.
#[derive(Debug, Clone, Serialize)]
pub struct Meta {
    #[serde(rename = "termsOfService", skip_serializing_if = "Option::is_none")]
    pub terms_of_service: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(rename = "caaIdentities", skip_serializing_if = "Vec::is_empty")]
    pub caa_identities: Vec<String>,
    #[serde(rename = "externalAccountRequired")]
    pub external_account_required: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Capabilities {
    pub meta: Meta,
    #[serde(rename = "strictMode")]
    pub strict_mode: bool,
    #[serde(rename = "alternateChains")]
    pub alternate_chains: usize,
    #[serde(rename = "challengeTypes")]
    pub challenge_types: Vec<super::challenge::Type>,
    #[serde(rename = "ocspResponder", skip_serializing_if = "Option::is_none")]
    pub ocsp_responder: Option<String>,
}
