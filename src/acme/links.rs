#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkHeader {
    pub url: String,
    pub relative: bool,
    pub relation: String,
}

impl LinkHeader {
    pub fn resolve(&self, base: &url::Url) -> Result<String, url::ParseError> {
        Ok(match self.relative {
            false => self.url.clone(),
            true => base.join(&self.url)?.to_string(),
        })
    }

    /// Renders the value of an HTTP `Link` header against the router's base URL
    pub fn header_value(&self, base: &url::Url) -> Result<String, url::ParseError> {
        Ok(format!("<{}>; rel=\"{}\"", self.resolve(base)?, self.relation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_links_join_base() {
        let base = url::Url::parse("https://127.0.0.1:14000/certZ/").unwrap();
        let link = LinkHeader {
            url: "abc/1".to_string(),
            relative: true,
            relation: "alternate".to_string(),
        };
        assert_eq!(link.header_value(&base).unwrap(), "<https://127.0.0.1:14000/certZ/abc/1>; rel=\"alternate\"");

        let absolute = LinkHeader {
            url: "https://example.com/tos".to_string(),
            relative: false,
            relation: "terms-of-service".to_string(),
        };
        assert_eq!(absolute.resolve(&base).unwrap(), "https://example.com/tos");
    }
}
