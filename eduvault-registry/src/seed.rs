//! Built-in issuer baselines

use eduvault_core::PerceptualHash;

use crate::IssuerRecord;

const BASELINES: &[(&str, &str, u64)] = &[
    ("cisco_ccna", "Cisco (CCNA)", 0xa761_9e89_691f_e036),
    ("linkedin_learning", "LinkedIn Learning", 0xd025_5a9b_2d52_2d7e),
    ("microsoft", "Microsoft", 0xecc1_9b8f_318e_c6c1),
    ("nptel", "NPTEL", 0xf2b7_42ea_2982_67b2),
    ("udemy", "Udemy", 0xbf63_c2d0_362c_e19c),
    ("unstop", "Unstop", 0x85fb_0ae8_5f82_3475),
    ("eduskills", "EduSkills", 0xc533_4fb1_6cb1_681b),
];

/// Baselines captured from genuine certificates of the common issuers
pub fn builtin_baselines() -> Vec<IssuerRecord> {
    BASELINES
        .iter()
        .map(|(id, name, bits)| IssuerRecord {
            issuer_id: id.to_string(),
            issuer_name: name.to_string(),
            phash: PerceptualHash::from_bits(*bits),
        })
        .collect()
}
