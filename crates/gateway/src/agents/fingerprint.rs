//! C2 Fingerprint & License Service (§4.2): computes the stable machine
//! fingerprint, classifies a presented fingerprint against the stored
//! Agent row on REGISTER, and hands out license UUIDs on activation.

use sha2::{Digest, Sha256};

use fleet_domain::model::{Agent, FingerprintChangeType, MachineFacts};

/// `compute(facts, license_uuid)` — stable hash over
/// `{cpuId, motherboardUuid, diskSerial, totalRamMb, osInstallationId,
/// licenseUuid}` (§4.2). `license_uuid` is the empty string before
/// activation, making the pre-activation fingerprint "provisional": it
/// necessarily changes once a licenseUuid is assigned.
pub fn compute(facts: &MachineFacts, license_uuid: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(facts.cpu_id.as_bytes());
    hasher.update(b"\0");
    hasher.update(facts.motherboard_uuid.as_bytes());
    hasher.update(b"\0");
    hasher.update(facts.disk_serial.as_bytes());
    hasher.update(b"\0");
    hasher.update(facts.total_ram_mb.to_string().as_bytes());
    hasher.update(b"\0");
    hasher.update(facts.os_installation_id.as_bytes());
    hasher.update(b"\0");
    hasher.update(license_uuid.unwrap_or("").as_bytes());
    hex::encode(hasher.finalize())
}

/// Outcome of classifying a presented fingerprint against the Agent row
/// found (if any) for `(customerId, machineId)` plus any row that already
/// owns the presented `licenseUuid` (§4.2). The duplicate-licenseUuid
/// check takes precedence over hardware/soft-field comparison: a
/// fingerprint that is both a licenseUuid duplicate and hardware-identical
/// is still a duplicate, never a silent match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// No existing row for `(customerId, machineId)` — first-ever REGISTER.
    NewAgent,
    /// Identical hardware and soft facts; just touch `lastSeenAt`.
    Match,
    /// IP/hostname/username changed; hardware identical.
    MinorDrift { change_type: FingerprintChangeType },
    /// A hardware component differs; forces re-activation.
    MajorDrift,
    /// The presented `licenseUuid` is already owned by a different
    /// `(customerId, machineId)` row.
    Duplicate,
}

/// Classify a REGISTER attempt. `existing` is the Agent row already
/// persisted for `(customerId, machineId)`, if any. `license_owner` is the
/// Agent row that already owns the presented `licenseUuid`, if any and if
/// different from `existing`.
pub fn classify(
    existing: Option<&Agent>,
    license_owner: Option<&Agent>,
    presented_license_uuid: Option<&str>,
    facts: &MachineFacts,
) -> Classification {
    if let (Some(presented), Some(owner)) = (presented_license_uuid, license_owner) {
        let is_different_row = match existing {
            Some(e) => e.id != owner.id,
            None => true,
        };
        if is_different_row {
            let _ = presented;
            return Classification::Duplicate;
        }
    }

    let Some(existing) = existing else {
        return Classification::NewAgent;
    };

    let Some(stored) = &existing.fingerprint_raw else {
        return Classification::Match;
    };

    let hardware_drifted = stored.cpu_id != facts.cpu_id
        || stored.motherboard_uuid != facts.motherboard_uuid
        || stored.disk_serial != facts.disk_serial
        || stored.total_ram_mb != facts.total_ram_mb
        || stored.os_installation_id != facts.os_installation_id;
    if hardware_drifted {
        return Classification::MajorDrift;
    }

    if stored.local_ip_address != facts.local_ip_address {
        return Classification::MinorDrift {
            change_type: FingerprintChangeType::IpChange,
        };
    }
    if stored.local_username != facts.local_username {
        return Classification::MinorDrift {
            change_type: FingerprintChangeType::UsernameChange,
        };
    }
    if stored.hostname != facts.hostname {
        return Classification::MinorDrift {
            change_type: FingerprintChangeType::IpChange,
        };
    }

    Classification::Match
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_domain::model::{Agent, OsType};

    fn facts(cpu_id: &str, ip: &str) -> MachineFacts {
        MachineFacts {
            hostname: "box".into(),
            os_type: OsType::MacOS,
            os_version: "14.0".into(),
            arch: "arm64".into(),
            cpu_model: "M2".into(),
            cpu_id: cpu_id.into(),
            disk_serial: "disk-1".into(),
            motherboard_uuid: "mb-1".into(),
            mac_address: "aa:bb".into(),
            total_ram_mb: 16384,
            local_username: "alice".into(),
            local_ip_address: ip.into(),
            os_installation_id: "os-1".into(),
        }
    }

    fn agent_with_facts(f: MachineFacts) -> Agent {
        let mut a = Agent::new("a1".into(), "u1".into(), "cust-A".into(), "m1".into());
        a.fingerprint_raw = Some(f);
        a
    }

    #[test]
    fn no_existing_row_is_new_agent() {
        let result = classify(None, None, None, &facts("cpu-1", "10.0.0.1"));
        assert_eq!(result, Classification::NewAgent);
    }

    #[test]
    fn identical_facts_match() {
        let stored = facts("cpu-1", "10.0.0.1");
        let agent = agent_with_facts(stored.clone());
        let result = classify(Some(&agent), None, None, &stored);
        assert_eq!(result, Classification::Match);
    }

    #[test]
    fn ip_change_is_minor_drift() {
        let stored = facts("cpu-1", "10.0.0.1");
        let agent = agent_with_facts(stored.clone());
        let presented = facts("cpu-1", "10.0.0.2");
        let result = classify(Some(&agent), None, None, &presented);
        assert_eq!(
            result,
            Classification::MinorDrift {
                change_type: FingerprintChangeType::IpChange
            }
        );
    }

    #[test]
    fn cpu_change_is_major_drift() {
        let stored = facts("cpu-1", "10.0.0.1");
        let agent = agent_with_facts(stored.clone());
        let presented = facts("cpu-2", "10.0.0.1");
        let result = classify(Some(&agent), None, None, &presented);
        assert_eq!(result, Classification::MajorDrift);
    }

    #[test]
    fn duplicate_license_wins_even_with_identical_hardware() {
        let stored = facts("cpu-1", "10.0.0.1");
        let mut owner = agent_with_facts(stored.clone());
        owner.id = "other-agent".into();
        owner.license_uuid = Some("lic-1".into());
        // No existing row for (customerId, machineId) of the *new* connection.
        let result = classify(None, Some(&owner), Some("lic-1"), &stored);
        assert_eq!(result, Classification::Duplicate);
    }

    #[test]
    fn compute_changes_once_license_uuid_assigned() {
        let f = facts("cpu-1", "10.0.0.1");
        let before = compute(&f, None);
        let after = compute(&f, Some("lic-1"));
        assert_ne!(before, after);
    }
}
