//! The closed set of built-in input/output names.
use spirv::BuiltIn;

/// Map a slot name to its built-in decoration. Any name outside this table
/// is rejected at declaration time.
pub fn from_name(name: &str) -> Option<BuiltIn> {
    let builtin = match name {
        "GlobalInvocationId" => BuiltIn::GlobalInvocationId,
        "LocalInvocationId" => BuiltIn::LocalInvocationId,
        "LocalInvocationIndex" => BuiltIn::LocalInvocationIndex,
        "WorkGroupId" => BuiltIn::WorkgroupId,
        "NumWorkGroups" => BuiltIn::NumWorkgroups,
        "VertexId" => BuiltIn::VertexId,
        "InstanceId" => BuiltIn::InstanceId,
        "Position" => BuiltIn::Position,
        "PointSize" => BuiltIn::PointSize,
        "PointCoord" => BuiltIn::PointCoord,
        "FragCoord" => BuiltIn::FragCoord,
        "FrontFacing" => BuiltIn::FrontFacing,
        "FragDepth" => BuiltIn::FragDepth,
        _ => return None,
    };
    Some(builtin)
}
