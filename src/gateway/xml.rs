//! # Session Request XML Rendering
//!
//! Deterministic rendering of the KSeF session-init XML documents. The
//! signed flow and the token flow share one template parameterised by
//! [`AuthFlow`]; they differ only in the root element name and the presence
//! of the encrypted `<ns3:Token>` element. Tag and namespace output must
//! match the official schema exactly for upstream compatibility.

/// Which session-initialisation flow the document is for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthFlow {
    /// Document to be signed externally and posted back (`InitSigned`)
    Signed,
    /// Token flow document carrying the RSA-encrypted session token string
    Token {
        /// Base64 ciphertext of `timestamp|authToken`
        encrypted_token: String,
    },
}

impl AuthFlow {
    fn root_element(&self) -> &'static str {
        match self {
            Self::Signed => "InitSessionSignedRequest",
            Self::Token { .. } => "InitSessionTokenRequest",
        }
    }
}

/// Renders a KSeF session request document.
///
/// The subject identifier variant is chosen by `subject_type`: `onip` yields
/// the company form, anything else the person form. The document-type
/// descriptor (service name, form code, schema version, namespace) is fixed.
#[must_use]
pub fn render_session_request(
    flow: &AuthFlow,
    challenge: &str,
    subject_type: &str,
    subject_identifier: &str,
) -> String {
    let root = flow.root_element();
    let identifier_type = if subject_type.eq_ignore_ascii_case("onip") {
        "ns2:SubjectIdentifierByCompanyType"
    } else {
        "ns2:SubjectIdentifierByPersonType"
    };

    let mut document = format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<ns3:{root}
    xmlns="http://ksef.mf.gov.pl/schema/gtw/svc/online/types/2021/10/01/0001"
    xmlns:ns2="http://ksef.mf.gov.pl/schema/gtw/svc/types/2021/10/01/0001"
    xmlns:ns3="http://ksef.mf.gov.pl/schema/gtw/svc/online/auth/request/2021/10/01/0001">
    <ns3:Context>
        <Challenge>{challenge}</Challenge>
        <Identifier xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" xsi:type="{identifier_type}">
            <ns2:Identifier>{identifier}</ns2:Identifier>
        </Identifier>
        <DocumentType>
            <ns2:Service>KSeF</ns2:Service>
            <ns2:FormCode>
                <ns2:SystemCode>FA (2)</ns2:SystemCode>
                <ns2:SchemaVersion>1-0E</ns2:SchemaVersion>
                <ns2:TargetNamespace>http://crd.gov.pl/wzor/2023/06/29/12648/</ns2:TargetNamespace>
                <ns2:Value>FA</ns2:Value>
            </ns2:FormCode>
        </DocumentType>
"#,
        root = root,
        challenge = escape_xml(challenge),
        identifier_type = identifier_type,
        identifier = escape_xml(subject_identifier),
    );

    if let AuthFlow::Token { encrypted_token } = flow {
        document.push_str(&format!(
            "        <ns3:Token>{}</ns3:Token>\n",
            escape_xml(encrypted_token)
        ));
    }

    document.push_str(&format!("    </ns3:Context>\n</ns3:{root}>\n"));
    document
}

/// Escapes the five XML-reserved characters in text content.
fn escape_xml(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            other => escaped.push(other),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHALLENGE: &str = "20250805-CR-0A1B2C3D4E-F960718293-AB";

    #[test]
    fn test_signed_flow_document() {
        let doc = render_session_request(&AuthFlow::Signed, CHALLENGE, "onip", "1111111111");

        assert!(doc.starts_with("<?xml version=\"1.0\""));
        assert!(doc.contains("<ns3:InitSessionSignedRequest"));
        assert!(doc.contains("</ns3:InitSessionSignedRequest>"));
        assert!(doc.contains(&format!("<Challenge>{CHALLENGE}</Challenge>")));
        assert!(doc.contains("xsi:type=\"ns2:SubjectIdentifierByCompanyType\""));
        assert!(doc.contains("<ns2:Identifier>1111111111</ns2:Identifier>"));
        assert!(!doc.contains("<ns3:Token>"));
    }

    #[test]
    fn test_token_flow_document() {
        let flow = AuthFlow::Token {
            encrypted_token: "QUJDRA==".to_string(),
        };
        let doc = render_session_request(&flow, CHALLENGE, "onip", "1111111111");

        assert!(doc.contains("<ns3:InitSessionTokenRequest"));
        assert!(doc.contains("</ns3:InitSessionTokenRequest>"));
        assert!(doc.contains("<ns3:Token>QUJDRA==</ns3:Token>"));
    }

    #[test]
    fn test_person_identifier_variant() {
        let doc = render_session_request(&AuthFlow::Signed, CHALLENGE, "opesel", "85121212345");
        assert!(doc.contains("xsi:type=\"ns2:SubjectIdentifierByPersonType\""));
        assert!(doc.contains("<ns2:Identifier>85121212345</ns2:Identifier>"));
    }

    #[test]
    fn test_fixed_document_type_descriptor() {
        let doc = render_session_request(&AuthFlow::Signed, CHALLENGE, "onip", "1111111111");
        assert!(doc.contains("<ns2:Service>KSeF</ns2:Service>"));
        assert!(doc.contains("<ns2:SystemCode>FA (2)</ns2:SystemCode>"));
        assert!(doc.contains("<ns2:SchemaVersion>1-0E</ns2:SchemaVersion>"));
        assert!(doc.contains("<ns2:TargetNamespace>http://crd.gov.pl/wzor/2023/06/29/12648/</ns2:TargetNamespace>"));
    }

    #[test]
    fn test_rendering_is_deterministic() {
        let a = render_session_request(&AuthFlow::Signed, CHALLENGE, "onip", "1111111111");
        let b = render_session_request(&AuthFlow::Signed, CHALLENGE, "onip", "1111111111");
        assert_eq!(a, b);
    }

    #[test]
    fn test_reserved_characters_escaped() {
        let doc = render_session_request(&AuthFlow::Signed, "a<b&c>", "onip", "\"quoted\"");
        assert!(doc.contains("<Challenge>a&lt;b&amp;c&gt;</Challenge>"));
        assert!(doc.contains("<ns2:Identifier>&quot;quoted&quot;</ns2:Identifier>"));
    }
}
