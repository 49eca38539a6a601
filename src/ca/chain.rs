use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::ec::{EcGroup, EcKey};
use openssl::error::ErrorStack;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{HasPublic, PKey, PKeyRef, Private};
use openssl::x509::extension::{AuthorityKeyIdentifier, BasicConstraints, KeyUsage, SubjectKeyIdentifier};
use openssl::x509::{X509, X509Name, X509NameRef, X509Ref};
use rand::RngCore;

const ROOT_VALIDITY_DAYS: u32 = 30 * 365;
const INTERMEDIATE_VALIDITY_DAYS: u32 = 5 * 365;

/// A root and the intermediate it signed.
pub struct Chain {
    pub(super) root_key: PKey<Private>,
    pub root: X509,
    pub(super) intermediate_key: PKey<Private>,
    pub intermediate: X509,
}

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chain")
            .field("root", self.root.subject_name())
            .field("intermediate", self.intermediate.subject_name())
            .finish_non_exhaustive()
    }
}

pub(super) fn generate_key() -> Result<PKey<Private>, ErrorStack> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1)?;
    PKey::from_ec_key(EcKey::generate(&group)?)
}

/// 16 random bytes, top bit cleared so the DER integer stays positive and
/// never zero.
pub(super) fn random_serial<R: RngCore>(rng: &mut R) -> Result<BigNum, ErrorStack> {
    let mut bytes = [0u8; 16];
    rng.fill_bytes(&mut bytes);
    bytes[0] &= 0x7f;
    if bytes[0] == 0 {
        bytes[0] = 0x01;
    }
    BigNum::from_slice(&bytes)
}

fn name(common_name: &str) -> Result<X509Name, ErrorStack> {
    let mut name = X509Name::builder()?;
    name.append_entry_by_nid(Nid::ORGANIZATIONNAME, "bjorn testca")?;
    name.append_entry_by_nid(Nid::COMMONNAME, common_name)?;
    Ok(name.build())
}

/// Signs a CA certificate for `subject_key` with `issuer_key`.
fn ca_certificate<R: RngCore, T: HasPublic>(
    rng: &mut R,
    subject: &X509NameRef,
    subject_key: &PKeyRef<T>,
    issuer: &X509Ref,
    issuer_key: &PKeyRef<Private>,
    validity_days: u32,
) -> Result<X509, ErrorStack> {
    let mut builder = X509::builder()?;
    builder.set_version(2)?;
    builder.set_serial_number(&*random_serial(rng)?.to_asn1_integer()?)?;
    builder.set_subject_name(subject)?;
    builder.set_issuer_name(issuer.subject_name())?;
    builder.set_pubkey(subject_key)?;
    builder.set_not_before(&*Asn1Time::days_from_now(0)?)?;
    builder.set_not_after(&*Asn1Time::days_from_now(validity_days)?)?;

    builder.append_extension(BasicConstraints::new().critical().ca().pathlen(0).build()?)?;
    builder.append_extension(KeyUsage::new().critical().key_cert_sign().crl_sign().digital_signature().build()?)?;
    let ski = SubjectKeyIdentifier::new().build(&builder.x509v3_context(Some(issuer), None))?;
    builder.append_extension(ski)?;
    let aki = AuthorityKeyIdentifier::new().keyid(true).build(&builder.x509v3_context(Some(issuer), None))?;
    builder.append_extension(aki)?;

    builder.sign(issuer_key, MessageDigest::sha256())?;
    Ok(builder.build())
}

impl Chain {
    pub(super) fn generate<R: RngCore>(index: usize, rng: &mut R) -> Result<Chain, ErrorStack> {
        let mut tag = [0u8; 3];
        rng.fill_bytes(&mut tag);
        let suffix = hex::encode(tag);

        let root_key = generate_key()?;
        let root_name = name(&format!("testca root ca {} {}", index, suffix))?;
        let root = {
            let mut builder = X509::builder()?;
            builder.set_version(2)?;
            builder.set_serial_number(&*random_serial(rng)?.to_asn1_integer()?)?;
            builder.set_subject_name(&root_name)?;
            builder.set_issuer_name(&root_name)?;
            builder.set_pubkey(&root_key)?;
            builder.set_not_before(&*Asn1Time::days_from_now(0)?)?;
            builder.set_not_after(&*Asn1Time::days_from_now(ROOT_VALIDITY_DAYS)?)?;
            builder.append_extension(BasicConstraints::new().critical().ca().build()?)?;
            builder.append_extension(KeyUsage::new().critical().key_cert_sign().crl_sign().digital_signature().build()?)?;
            let ski = SubjectKeyIdentifier::new().build(&builder.x509v3_context(None, None))?;
            builder.append_extension(ski)?;
            builder.sign(&root_key, MessageDigest::sha256())?;
            builder.build()
        };

        let intermediate_key = generate_key()?;
        let intermediate_name = name(&format!("testca intermediate ca {} {}", index, suffix))?;
        let intermediate = ca_certificate(
            rng, &intermediate_name, &intermediate_key, &root, &root_key, INTERMEDIATE_VALIDITY_DAYS,
        )?;

        Ok(Chain {
            root_key,
            root,
            intermediate_key,
            intermediate,
        })
    }

    /// Re-issues this chain's intermediate under `issuer`'s root, giving leaves
    /// signed by this intermediate a path to that root.
    pub(super) fn cross_signed_by<R: RngCore>(&self, issuer: &Chain, rng: &mut R) -> Result<X509, ErrorStack> {
        ca_certificate(
            rng, self.intermediate.subject_name(), &self.intermediate_key,
            &issuer.root, &issuer.root_key, INTERMEDIATE_VALIDITY_DAYS,
        )
    }
}
