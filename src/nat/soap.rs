//! SOAP port mapping actions against a WAN IP connection control URL.

use std::fmt::Write as _;
use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use url::Url;
use xmltree::{Element, XMLNode};

use super::description::WAN_IP_CONNECTION;
use super::error::{NatResult, UpnpError, UpnpErrorCode};
use super::http::{self, HttpResponse};
use super::types::{ControlEndpoint, MappingRequest, Protocol};
use super::PortMapConfig;

const SOAP_ENVELOPE_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
const SOAP_ENCODING: &str = "http://schemas.xmlsoap.org/soap/encoding/";

/// Add/delete operations on a gateway.
///
/// `Ok(false)` is a refusal by the gateway (non-2xx); `Err` is a transport
/// failure. Callers treat both as "try the next candidate".
#[async_trait]
pub trait PortMappingClient: Send + Sync {
    async fn add_mapping(&self, endpoint: &ControlEndpoint, request: &MappingRequest) -> NatResult<bool>;

    async fn delete_mapping(
        &self,
        endpoint: &ControlEndpoint,
        protocol: Protocol,
        external_port: u16,
    ) -> NatResult<bool>;

    /// Public address of the gateway, when it reports one
    async fn external_ip(&self, _endpoint: &ControlEndpoint) -> NatResult<Option<IpAddr>> {
        Ok(None)
    }
}

/// Fault detail from a failed action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoapFault {
    pub code: Option<u16>,
    pub description: String,
}

impl SoapFault {
    pub fn kind(&self) -> Option<UpnpErrorCode> {
        self.code.and_then(UpnpErrorCode::from_code)
    }

    /// Whether the gateway may accept the same request on a later cycle
    pub fn is_recoverable(&self) -> bool {
        self.kind().map(|kind| kind.is_recoverable()).unwrap_or(false)
    }
}

/// Port mapping client speaking SOAP over HTTP/1.1
#[derive(Debug, Clone)]
pub struct SoapClient {
    service_type: String,
    timeout: Duration,
}

impl SoapClient {
    pub fn new(config: &PortMapConfig) -> Self {
        Self {
            service_type: WAN_IP_CONNECTION.to_string(),
            timeout: config.http_timeout,
        }
    }

    /// `SOAPAction` header value, quotes included
    pub fn soap_action(&self, action: &str) -> String {
        format!("\"{}#{}\"", self.service_type, action)
    }

    /// Request body for `action` with `args` in order
    pub fn envelope(&self, action: &str, args: &[(&str, String)]) -> String {
        let mut fields = String::new();
        for (name, value) in args {
            let _ = write!(fields, "<{0}>{1}</{0}>", name, xml_escape(value));
        }

        format!(
            "<?xml version=\"1.0\"?>\r\n\
             <s:Envelope xmlns:s=\"{}\" s:encodingStyle=\"{}\">\
             <s:Body>\
             <u:{action} xmlns:u=\"{}\">{fields}</u:{action}>\
             </s:Body>\
             </s:Envelope>\r\n",
            SOAP_ENVELOPE_NS,
            SOAP_ENCODING,
            self.service_type,
            action = action,
            fields = fields,
        )
    }

    pub fn add_mapping_args(request: &MappingRequest) -> Vec<(&'static str, String)> {
        vec![
            ("NewRemoteHost", String::new()),
            ("NewExternalPort", request.external_port.to_string()),
            ("NewProtocol", request.protocol.as_str().to_string()),
            ("NewInternalPort", request.internal_port.to_string()),
            ("NewInternalClient", request.internal_ip.to_string()),
            ("NewEnabled", "1".to_string()),
            ("NewPortMappingDescription", request.description.clone()),
            ("NewLeaseDuration", request.lease_duration.as_secs().to_string()),
        ]
    }

    pub fn delete_mapping_args(protocol: Protocol, external_port: u16) -> Vec<(&'static str, String)> {
        vec![
            ("NewRemoteHost", String::new()),
            ("NewExternalPort", external_port.to_string()),
            ("NewProtocol", protocol.as_str().to_string()),
        ]
    }

    async fn invoke(
        &self,
        endpoint: &ControlEndpoint,
        action: &str,
        args: &[(&str, String)],
    ) -> NatResult<HttpResponse> {
        let url = Url::parse(&endpoint.control_url)
            .map_err(|e| UpnpError::InvalidUrl(format!("{}: {}", endpoint.control_url, e)))?;
        let host = match (url.host_str(), url.port_or_known_default()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            _ => format!("{}:{}", endpoint.host, endpoint.port),
        };

        let body = self.envelope(action, args);
        let headers = [
            ("Host", host),
            ("Content-Length", body.len().to_string()),
            ("Content-Type", "text/xml; charset=\"utf-8\"".to_string()),
            ("SOAPAction", self.soap_action(action)),
        ];

        debug!("{} -> {}", action, endpoint.control_url);
        http::post(&url, &headers, &body, self.timeout).await
    }

    /// Log a refused action; always returns `false`
    fn report_refusal(action: &str, endpoint: &ControlEndpoint, port: u16, response: &HttpResponse) -> bool {
        match parse_faults(&response.body) {
            Ok(faults) if !faults.is_empty() => {
                for fault in faults {
                    let code = match (fault.code, fault.kind()) {
                        (_, Some(kind)) => format!(" ({} {})", kind.code(), kind),
                        (Some(code), None) => format!(" ({})", code),
                        (None, None) => String::new(),
                    };
                    let outlook = if fault.is_recoverable() { ", may clear by next renewal" } else { "" };
                    warn!(
                        "{} for port {} refused by {}: {}{}{}",
                        action, port, endpoint.control_url, fault.description, code, outlook
                    );
                }
            }
            Ok(_) => warn!(
                "{} for port {} failed at {}: HTTP {} {}",
                action, port, endpoint.control_url, response.status, response.reason
            ),
            Err(e) => warn!(
                "{} for port {} failed at {}: HTTP {} with unreadable body ({})",
                action, port, endpoint.control_url, response.status, e
            ),
        }
        false
    }
}

#[async_trait]
impl PortMappingClient for SoapClient {
    async fn add_mapping(&self, endpoint: &ControlEndpoint, request: &MappingRequest) -> NatResult<bool> {
        let args = Self::add_mapping_args(request);
        let response = self.invoke(endpoint, "AddPortMapping", &args).await?;

        if !response.is_success() {
            return Ok(Self::report_refusal("AddPortMapping", endpoint, request.external_port, &response));
        }

        info!(
            "Mapped {} port {} -> {}:{} via {} ({}s lease)",
            request.protocol,
            request.external_port,
            request.internal_ip,
            request.internal_port,
            endpoint.control_url,
            request.lease_duration.as_secs()
        );
        Ok(true)
    }

    async fn delete_mapping(
        &self,
        endpoint: &ControlEndpoint,
        protocol: Protocol,
        external_port: u16,
    ) -> NatResult<bool> {
        let args = Self::delete_mapping_args(protocol, external_port);
        let response = self.invoke(endpoint, "DeletePortMapping", &args).await?;

        if !response.is_success() {
            return Ok(Self::report_refusal("DeletePortMapping", endpoint, external_port, &response));
        }

        info!("Removed {} port {} mapping at {}", protocol, external_port, endpoint.control_url);
        Ok(true)
    }

    async fn external_ip(&self, endpoint: &ControlEndpoint) -> NatResult<Option<IpAddr>> {
        let response = self.invoke(endpoint, "GetExternalIPAddress", &[]).await?;
        if !response.is_success() {
            debug!("GetExternalIPAddress at {} returned {}", endpoint.control_url, response.status);
            return Ok(None);
        }

        let root = Element::parse(response.body.as_slice())
            .map_err(|e| UpnpError::XmlParseError(e.to_string()))?;

        Ok(find_text(&root, "NewExternalIPAddress").and_then(|ip| ip.trim().parse().ok()))
    }
}

/// Every `errorDescription` in a fault body, with the sibling `errorCode`
pub fn parse_faults(body: &[u8]) -> Result<Vec<SoapFault>, UpnpError> {
    let root = Element::parse(body).map_err(|e| UpnpError::XmlParseError(e.to_string()))?;
    let mut faults = Vec::new();
    collect_faults(&root, &mut faults);
    Ok(faults)
}

fn collect_faults(element: &Element, out: &mut Vec<SoapFault>) {
    for child in element.children.iter() {
        let XMLNode::Element(child) = child else { continue };

        if child.name == "errorDescription" {
            out.push(SoapFault {
                code: element
                    .get_child("errorCode")
                    .and_then(|c| c.get_text())
                    .and_then(|c| c.trim().parse().ok()),
                description: child.get_text().map(|t| t.trim().to_string()).unwrap_or_default(),
            });
        } else {
            collect_faults(child, out);
        }
    }
}

fn find_text(element: &Element, name: &str) -> Option<String> {
    if element.name == name {
        return element.get_text().map(|t| t.into_owned());
    }
    element.children.iter().find_map(|child| match child {
        XMLNode::Element(child) => find_text(child, name),
        _ => None,
    })
}

fn xml_escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            c => escaped.push(c),
        }
    }
    escaped
}
