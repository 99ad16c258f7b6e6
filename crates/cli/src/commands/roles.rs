//! `storyloom roles`: Print the persona registry.

use storyloom_core::role::{self, RoleProfile};

fn ops_column(profile: &RoleProfile) -> String {
    if profile.allowed_ops.is_empty() {
        return "(writing only)".into();
    }
    profile
        .allowed_ops
        .iter()
        .map(|op| op.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn marker(profile: &RoleProfile) -> &'static str {
    if profile.id == role::DEFAULT_ROLE_ID {
        " (default)"
    } else if profile.id == role::SUPERVISOR_ROLE_ID {
        " (supervisor)"
    } else {
        ""
    }
}

pub fn run() {
    println!("🎭 Roles\n");
    for profile in role::all() {
        println!("  {}{} — {}", profile.id, marker(profile), profile.name);
        println!("     {}", profile.summary);
        println!("     canvas: {}", ops_column(profile));
    }
}
