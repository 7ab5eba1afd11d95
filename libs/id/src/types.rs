//! Typed identifier definitions.
//!
//! All identifiers are assigned by the controller; the launcher only ever
//! parses them, except in tests.

use crate::define_uuid;

// =============================================================================
// Workloads
// =============================================================================

define_uuid!(InstanceUuid, "instance_uuid");
define_uuid!(ImageUuid, "image_uuid");
define_uuid!(TenantUuid, "tenant_uuid");

// =============================================================================
// Agents
// =============================================================================

define_uuid!(AgentUuid, "workload_agent_uuid");

// =============================================================================
// Networking
// =============================================================================

define_uuid!(VnicUuid, "vnic_uuid");
define_uuid!(ConcentratorUuid, "concentrator_uuid");

// =============================================================================
// Tests
// =============================================================================
