//! Device description fetch and WAN IP connection lookup.

use async_trait::async_trait;
use tracing::{debug, warn};
use url::Url;
use xmltree::{Element, XMLNode};

use super::error::{NatResult, UpnpError};
use super::types::ControlEndpoint;
use super::PortMapConfig;

/// Service type whose control URL accepts the port mapping actions
pub const WAN_IP_CONNECTION: &str = "urn:schemas-upnp-org:service:WANIPConnection:1";

/// Turns a description URL into a control endpoint
#[async_trait]
pub trait ControlUrlResolver: Send + Sync {
    /// `Ok(None)` when the device does not offer the WAN IP connection service
    /// or refuses to serve its description.
    async fn resolve(&self, location: &str) -> NatResult<Option<ControlEndpoint>>;
}

/// Resolver that fetches the description document over HTTP
#[derive(Debug, Clone)]
pub struct DescriptionResolver {
    client: reqwest::Client,
}

impl DescriptionResolver {
    pub fn new(config: &PortMapConfig) -> NatResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .no_proxy()
            .build()
            .map_err(|e| UpnpError::Transport(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl ControlUrlResolver for DescriptionResolver {
    async fn resolve(&self, location: &str) -> NatResult<Option<ControlEndpoint>> {
        let url = Url::parse(location)
            .map_err(|e| UpnpError::InvalidUrl(format!("{}: {}", location, e)))?;
        let host = url
            .host_str()
            .ok_or_else(|| UpnpError::InvalidUrl(format!("{}: no host", location)))?
            .to_string();
        let port = url
            .port_or_known_default()
            .ok_or_else(|| UpnpError::InvalidUrl(format!("{}: no port", location)))?;

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| UpnpError::Transport(format!("GET {}: {}", location, e)))?;

        let status = response.status();
        if !status.is_success() {
            let error = UpnpError::HttpError {
                code: status.as_u16(),
                reason: status.canonical_reason().unwrap_or_default().to_string(),
            };
            warn!("Device description at {} unavailable: {}", location, error);
            return Ok(None);
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| UpnpError::Transport(format!("Reading {}: {}", location, e)))?;

        let root = Element::parse(body.as_ref())
            .map_err(|e| UpnpError::XmlParseError(format!("{}: {}", location, e)))?;

        match find_control_url(&root, WAN_IP_CONNECTION) {
            Some(control_url) => {
                let control_url = absolute_control_url(&url, &control_url);
                debug!("WAN IP connection control URL for {}: {}", location, control_url);
                Ok(Some(ControlEndpoint { control_url, host, port }))
            }
            None => {
                debug!("No {} service in {}", WAN_IP_CONNECTION, location);
                Ok(None)
            }
        }
    }
}

/// Control URL of the first `service` whose `serviceType` equals
/// `service_type`, searching the whole document including embedded devices.
pub fn find_control_url(element: &Element, service_type: &str) -> Option<String> {
    if element.name == "service" {
        let matches = element
            .get_child("serviceType")
            .and_then(|st| st.get_text())
            .map(|st| st.trim() == service_type)
            .unwrap_or(false);

        if matches {
            return element
                .get_child("controlURL")
                .and_then(|c| c.get_text())
                .map(|c| c.trim().to_string());
        }
    }

    element.children.iter().find_map(|child| match child {
        XMLNode::Element(child) => find_control_url(child, service_type),
        _ => None,
    })
}

/// Make `control_url` absolute against the description document's URL.
///
/// Absolute URLs pass through unchanged. Relative ones become
/// `scheme://host:port/path` using the description URL's scheme, host and port.
pub fn absolute_control_url(description: &Url, control_url: &str) -> String {
    let lower = control_url.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        return control_url.to_string();
    }

    let host = description.host_str().unwrap_or_default();
    let port = description.port_or_known_default().unwrap_or(80);
    let sep = if control_url.starts_with('/') { "" } else { "/" };

    format!("{}://{}:{}{}{}", description.scheme(), host, port, sep, control_url)
}

#[cfg(test)]
mod tests {
    use super::*;

    const IGD_DESCRIPTION: &str = r#"<?xml version="1.0"?>
<root xmlns="urn:schemas-upnp-org:device-1-0">
  <device>
    <deviceType>urn:schemas-upnp-org:device:InternetGatewayDevice:1</deviceType>
    <serviceList>
      <service>
        <serviceType>urn:schemas-upnp-org:service:Layer3Forwarding:1</serviceType>
        <controlURL>/ctl/L3F</controlURL>
      </service>
    </serviceList>
    <deviceList>
      <device>
        <deviceType>urn:schemas-upnp-org:device:WANDevice:1</deviceType>
        <deviceList>
          <device>
            <deviceType>urn:schemas-upnp-org:device:WANConnectionDevice:1</deviceType>
            <serviceList>
              <service>
                <serviceType>urn:schemas-upnp-org:service:WANIPConnection:1</serviceType>
                <controlURL>/ctl/IPConn</controlURL>
              </service>
            </serviceList>
          </device>
        </deviceList>
      </device>
    </deviceList>
  </device>
</root>"#;

    #[test]
    fn test_find_nested_wan_service() {
        let root = Element::parse(IGD_DESCRIPTION.as_bytes()).unwrap();
        assert_eq!(
            find_control_url(&root, WAN_IP_CONNECTION).as_deref(),
            Some("/ctl/IPConn")
        );
    }

    #[test]
    fn test_service_type_must_match_exactly() {
        let xml = r#"<root><device><serviceList>
            <service>
              <serviceType>urn:schemas-upnp-org:service:WANIPConnection:2</serviceType>
              <controlURL>/v2</controlURL>
            </service>
            <service>
              <serviceType>urn:schemas-upnp-org:service:WANPPPConnection:1</serviceType>
              <controlURL>/ppp</controlURL>
            </service>
        </serviceList></device></root>"#;
        let root = Element::parse(xml.as_bytes()).unwrap();
        assert!(find_control_url(&root, WAN_IP_CONNECTION).is_none());
    }

    #[test]
    fn test_absolute_control_url() {
        let base = Url::parse("http://192.168.1.1:5000/rootDesc.xml").unwrap();

        assert_eq!(
            absolute_control_url(&base, "/ctl/IPConn"),
            "http://192.168.1.1:5000/ctl/IPConn"
        );
        assert_eq!(
            absolute_control_url(&base, "upnp/control/WANIPConn1"),
            "http://192.168.1.1:5000/upnp/control/WANIPConn1"
        );
        assert_eq!(
            absolute_control_url(&base, "http://10.0.0.138:49000/igdupnp/control/WANIPConn1"),
            "http://10.0.0.138:49000/igdupnp/control/WANIPConn1"
        );
    }

    #[test]
    fn test_absolute_control_url_default_port() {
        let base = Url::parse("http://10.0.0.1/desc.xml").unwrap();
        assert_eq!(absolute_control_url(&base, "/ctl"), "http://10.0.0.1:80/ctl");
    }
}
