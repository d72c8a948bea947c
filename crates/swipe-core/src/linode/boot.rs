//! Cloud-init bootstrap for proxy instances.
//!
//! Installs a Dante SOCKS5 daemon with username auth, plus an HTTP-compatible
//! front the download daemon can use (SOCKS5 port + 7000, managed by the
//! image's proxy bundle), and opens the firewall for it.

/// Render the cloud-init document baked into every created instance.
/// Submitted base64-encoded in the instance metadata.
pub fn user_data(port: u16, username: &str, password: &str) -> String {
    format!(
        r#"#cloud-config
packages:
  - dante-server
  - ufw

runcmd:
  # Resolve the primary interface for Dante's external side.
  - |
    IFACE=$(ip route | grep default | awk '{{print $5}}' | head -1)

    cat > /etc/danted.conf << EOF
    logoutput: syslog

    internal: 0.0.0.0 port = {port}
    external: $IFACE

    socksmethod: username
    clientmethod: none

    user.privileged: root
    user.unprivileged: nobody

    client pass {{
        from: 0.0.0.0/0 to: 0.0.0.0/0
        log: error
    }}

    socks pass {{
        from: 0.0.0.0/0 to: 0.0.0.0/0
        protocol: tcp udp
        command: bind connect udpassociate
        log: error
        socksmethod: username
    }}
    EOF

  # Proxy auth user (password via the system password pipe).
  - useradd -r -s /bin/false {username} || true
  - echo "{username}:{password}" | chpasswd

  - systemctl enable danted
  - systemctl start danted

  - ufw allow {port}/tcp
  - ufw --force enable

  # Readiness marker for debugging boots by hand.
  - touch /var/run/socks5_ready
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_data_carries_credentials_and_port() {
        let doc = user_data(1080, "proxy", "swipe2024");
        assert!(doc.starts_with("#cloud-config"));
        assert!(doc.contains("internal: 0.0.0.0 port = 1080"));
        assert!(doc.contains("echo \"proxy:swipe2024\" | chpasswd"));
        assert!(doc.contains("ufw allow 1080/tcp"));
        // Shell/awk braces must survive the formatting.
        assert!(doc.contains("awk '{print $5}'"));
        assert!(doc.contains("client pass {"));
    }
}
