use std::convert::TryFrom;
use base64::prelude::*;

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct JWK {
    pub kty: String,
    #[serde(flatten)]
    pub params: JWKType
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum JWKType {
    EC {
        crv: String,
        x: String,
        y: String,
    },
    RSA {
        n: String,
        e: String,
    },
    OKP {
        crv: String,
        x: String,
    }
}

impl TryFrom<&openssl::pkey::PKeyRef<openssl::pkey::Public>> for JWK {
    type Error = String;

    fn try_from(from: &openssl::pkey::PKeyRef<openssl::pkey::Public>) -> Result<Self, Self::Error> {
        let (kty, params) = match from.id() {
            openssl::pkey::Id::EC => {
                let ec_key = from.ec_key().map_err(|err| format!("Invalid EC key: {}", err))?;

                let (crv, size) = match ec_key.group().curve_name() {
                    Some(openssl::nid::Nid::X9_62_PRIME256V1) => ("P-256", 32),
                    Some(openssl::nid::Nid::SECP384R1) => ("P-384", 48),
                    Some(openssl::nid::Nid::SECP521R1) => ("P-521", 66),
                    _ => return Err("Unknown curve".to_string()),
                };

                let pubkey = ec_key.public_key();
                let mut ctx = openssl::bn::BigNumContext::new().map_err(|err| err.to_string())?;
                let mut x = openssl::bn::BigNum::new().map_err(|err| err.to_string())?;
                let mut y = openssl::bn::BigNum::new().map_err(|err| err.to_string())?;
                pubkey.affine_coordinates_gfp(ec_key.group(), &mut x, &mut y, &mut ctx)
                    .map_err(|err| format!("Invalid EC point: {}", err))?;
                let x = x.to_vec_padded(size).map_err(|err| err.to_string())?;
                let y = y.to_vec_padded(size).map_err(|err| err.to_string())?;

                ("EC", JWKType::EC {
                    crv: crv.to_string(),
                    x: BASE64_URL_SAFE_NO_PAD.encode(x),
                    y: BASE64_URL_SAFE_NO_PAD.encode(y),
                })
            },
            openssl::pkey::Id::RSA => {
                let rsa_key = from.rsa().map_err(|err| format!("Invalid RSA key: {}", err))?;

                ("RSA", JWKType::RSA {
                    n: BASE64_URL_SAFE_NO_PAD.encode(rsa_key.n().to_vec()),
                    e: BASE64_URL_SAFE_NO_PAD.encode(rsa_key.e().to_vec()),
                })
            },
            openssl::pkey::Id::ED25519 => {
                let raw = from.raw_public_key().map_err(|err| format!("Invalid Ed25519 key: {}", err))?;

                ("OKP", JWKType::OKP {
                    crv: "Ed25519".to_string(),
                    x: BASE64_URL_SAFE_NO_PAD.encode(raw),
                })
            },
            _ => return Err("Unsupported key type".to_string())
        };

        Ok(JWK {
            kty: kty.to_string(),
            params,
        })
    }
}

/// RFC 7638 thumbprint: SHA-256 over the required members in lexicographic order.
pub fn make_jwk_thumbprint(jwk: &JWK) -> Result<String, String> {
    let jwk = serde_json::to_value(jwk).map_err(|err| err.to_string())?;
    let jwk: std::collections::BTreeMap<String, serde_json::Value> = serde_json::from_value(jwk)
        .map_err(|err| err.to_string())?;
    let jwk = serde_json::to_string(&jwk).map_err(|err| err.to_string())?;
    let thumbprint_bytes = openssl::hash::hash(openssl::hash::MessageDigest::sha256(), jwk.as_bytes())
        .map_err(|err| err.to_string())?;
    Ok(BASE64_URL_SAFE_NO_PAD.encode(&thumbprint_bytes))
}

pub fn key_thumbprint(key: &openssl::pkey::PKeyRef<openssl::pkey::Public>) -> Result<String, String> {
    let jwk = JWK::try_from(key)?;
    make_jwk_thumbprint(&jwk)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ec_key() -> openssl::pkey::PKey<openssl::pkey::Public> {
        let group = openssl::ec::EcGroup::from_curve_name(openssl::nid::Nid::X9_62_PRIME256V1).unwrap();
        let key = openssl::ec::EcKey::generate(&group).unwrap();
        let pkey = openssl::pkey::PKey::from_ec_key(key).unwrap();
        openssl::pkey::PKey::public_key_from_der(&pkey.public_key_to_der().unwrap()).unwrap()
    }

    #[test]
    fn ec_jwk_has_padded_coordinates() {
        let key = ec_key();
        let jwk = JWK::try_from(&*key).unwrap();
        assert_eq!(jwk.kty, "EC");
        match jwk.params {
            JWKType::EC { crv, x, y } => {
                assert_eq!(crv, "P-256");
                assert_eq!(BASE64_URL_SAFE_NO_PAD.decode(x).unwrap().len(), 32);
                assert_eq!(BASE64_URL_SAFE_NO_PAD.decode(y).unwrap().len(), 32);
            }
            other => panic!("unexpected params {:?}", other),
        }
    }

    #[test]
    fn thumbprint_matches_rfc7638_example() {
        // RFC 7638 section 3.1
        let jwk = JWK {
            kty: "RSA".to_string(),
            params: JWKType::RSA {
                n: "0vx7agoebGcQSuuPiLJXZptN9nndrQmbXEps2aiAFbWhM78LhWx4cbbfAAtVT86zwu1RK7aPFFxuhDR1L6tSoc_BJECPebWKRXjBZCiFV4n3oknjhMstn64tZ_2W-5JsGY4Hc5n9yBXArwl93lqt7_RN5w6Cf0h4QyQ5v-65YGjQR0_FDW2QvzqY368QQMicAtaSqzs8KJZgnYb9c7d0zgdAZHzu6qMQvRL5hajrn1n91CbOpbISD08qNLyrdkt-bFTWhAI4vMQFh6WeZu0fM4lFd2NcRwr3XPksINHaQ-G_xBniIqbw0Ls1jF44-csFCur-kEgU8awapJzKnqDKgw".to_string(),
                e: "AQAB".to_string(),
            },
        };
        assert_eq!(make_jwk_thumbprint(&jwk).unwrap(), "NzbLsXh8uDCcd-6MNwXF4W_7noWXFZAfHkxZsRGC9Xs");
    }

    #[test]
    fn thumbprint_is_stable_per_key() {
        let a = ec_key();
        let b = ec_key();
        assert_eq!(key_thumbprint(&a).unwrap(), key_thumbprint(&a).unwrap());
        assert_ne!(key_thumbprint(&a).unwrap(), key_thumbprint(&b).unwrap());
    }
}
