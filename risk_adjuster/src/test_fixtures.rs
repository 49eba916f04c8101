//! Deterministic synthetic members for unit tests.

use crate::data_handling::claims::MemberRecord;
use crate::hcc_mapping::ConditionMapper;

pub(crate) const CONDITIONS: [&str; 7] = [
    "diabetes",
    "hypertension",
    "heart_disease",
    "copd",
    "cancer",
    "kidney_disease",
    "mental_health",
];

/// `n` members with 0–3 conditions, ages 0–100, alternating gender; cost tracks the category score.
pub(crate) fn synthetic_members(n: usize) -> Vec<MemberRecord> {
    let mapper = ConditionMapper::standard();
    (0..n)
        .map(|i| {
            let gender = if i % 2 == 0 { "male" } else { "female" };
            let mut record = MemberRecord::new(format!("M{:04}", i), ((i * 37) % 101) as i64, gender);
            for k in 0..(i % 4) {
                record = record.with_condition(CONDITIONS[(i + 2 * k) % CONDITIONS.len()]);
            }
            let score = mapper.member_risk_score(&record);
            let cost = 800.0 + 1200.0 * score + 15.0 * record.age as f64;
            record.with_utilization(cost, 1 + (i % 5) as u32)
        })
        .collect()
}
