//! Overload resolution.
//!
//! Candidates are filtered by arity, then every argument/parameter pair
//! is scored for conversion quality. The candidate with the highest
//! average score wins; no candidate or a tied best is a compile error
//! naming the call and the declared signatures.
//!
//! Score tiers, best to worst:
//! - exact match: 1.0
//! - primitive widening: 0.99 down to 0.95 by lattice distance
//! - box or unbox to the exact counterpart: 0.7
//! - unbox then widen: 0.6 plus a fraction of the widening score
//! - reference up to a known supertype: 0.5
//! - incompatible: 0 (disqualifies the candidate)
//!
//! A varargs candidate reached by packing loose trailing arguments is
//! scored as the per-position average times 0.95.

use kava_ast::Param;

use crate::error::{CompileError, CompileResult};
use crate::types::{JvmType, MethodFlags, MethodSignature, OBJECT};

/// Score a single argument against a parameter type.
pub fn score_arg(arg: &JvmType, param: &JvmType) -> f64 {
    if arg == param {
        return 1.0;
    }
    if let Some(distance) = arg.widening_distance(param) {
        return widening_score(distance);
    }
    // Boxing: primitive argument into a reference parameter.
    if arg.is_primitive() {
        if let (Some(wrapper), JvmType::Reference(target)) = (arg.wrapper(), param) {
            if wrapper == target {
                return 0.7;
            }
            if crate::types::is_assignable(&JvmType::reference(wrapper), param) {
                return 0.5;
            }
        }
        return 0.0;
    }
    // Unboxing: wrapper argument into a primitive parameter.
    if param.is_primitive() {
        if let Some(unboxed) = arg.unboxed() {
            if &unboxed == param {
                return 0.7;
            }
            if let Some(distance) = unboxed.widening_distance(param) {
                return 0.6 + 0.09 * widening_score(distance);
            }
        }
        return 0.0;
    }
    // Reference hierarchy. An Object argument is only ever the inferred
    // type of a bare null, which any reference parameter accepts.
    match (arg, param) {
        (JvmType::Reference(from), JvmType::Reference(_)) if from == OBJECT => 0.5,
        (JvmType::Reference(_), JvmType::Reference(_)) | (JvmType::Array(_), JvmType::Reference(_))
            if crate::types::is_assignable(arg, param) =>
        {
            0.5
        }
        _ => 0.0,
    }
}

fn widening_score(distance: u8) -> f64 {
    (1.0 - 0.01 * distance as f64).max(0.95)
}

/// Average score of a full argument list, or `None` if any position is
/// incompatible.
fn score_call(args: &[JvmType], params: &[JvmType]) -> Option<f64> {
    if args.len() != params.len() {
        return None;
    }
    if args.is_empty() {
        return Some(1.0);
    }
    let mut total = 0.0;
    for (arg, param) in args.iter().zip(params) {
        let s = score_arg(arg, param);
        if s == 0.0 {
            return None;
        }
        total += s;
    }
    Some(total / args.len() as f64)
}

/// Average score of trailing arguments packed into a rest parameter,
/// penalized so an exact fixed-arity candidate always beats the packing.
fn score_call_packed(args: &[JvmType], params: &[JvmType]) -> Option<f64> {
    let fixed = params.len().checked_sub(1)?;
    if args.len() < fixed {
        return None;
    }
    let Some(JvmType::Array(elem)) = params.last() else {
        return None;
    };
    if args.is_empty() {
        return Some(0.95);
    }
    let mut total = 0.0;
    for (arg, param) in args[..fixed].iter().zip(&params[..fixed]) {
        let s = score_arg(arg, param);
        if s == 0.0 {
            return None;
        }
        total += s;
    }
    for arg in &args[fixed..] {
        let s = score_arg(arg, elem);
        if s == 0.0 {
            return None;
        }
        total += s;
    }
    Some(total / args.len() as f64 * 0.95)
}

/// Pick the best overload for the given argument types.
pub fn resolve<'a>(
    name: &str,
    candidates: &'a [MethodSignature],
    args: &[JvmType],
) -> CompileResult<&'a MethodSignature> {
    let mut best: Option<(&MethodSignature, f64)> = None;
    let mut tied = false;
    for candidate in candidates {
        let score = match score_call(args, &candidate.params) {
            Some(s) => s,
            None if candidate.flags.contains(MethodFlags::VARARGS) => {
                match score_call_packed(args, &candidate.params) {
                    Some(s) => s,
                    None => continue,
                }
            }
            None => continue,
        };
        match &best {
            Some((_, best_score)) if score > *best_score => {
                best = Some((candidate, score));
                tied = false;
            }
            Some((_, best_score)) if (score - best_score).abs() < f64::EPSILON => {
                tied = true;
            }
            None => best = Some((candidate, score)),
            _ => {}
        }
    }
    let arg_names: Vec<String> = args.iter().map(|a| a.display_name()).collect();
    let call = format!("{}({})", name, arg_names.join(", "));
    match best {
        Some((sig, _)) if !tied => Ok(sig),
        Some(_) => Err(CompileError::overload(format!(
            "Ambiguous call to {call}; candidates: {}",
            candidate_list(candidates)
        ))),
        None => Err(CompileError::overload(format!(
            "No matching overload for {call}; candidates: {}",
            candidate_list(candidates)
        ))),
    }
}

fn candidate_list(candidates: &[MethodSignature]) -> String {
    let sigs: Vec<String> = candidates.iter().map(|c| c.display()).collect();
    sigs.join(", ")
}

/// Validated parameter shape for signature synthesis: defaulted
/// parameters must be trailing and a rest parameter must come last.
/// Returns the arity range `min..=max` the declaration covers (each
/// omitted-default count becomes one forwarding overload).
pub fn validate_params(params: &[Param]) -> CompileResult<(usize, usize)> {
    let mut first_default = None;
    for (i, param) in params.iter().enumerate() {
        if param.rest {
            if i != params.len() - 1 {
                return Err(CompileError::unsupported(format!(
                    "Rest parameter '{}' must be the last parameter",
                    param.name.name
                )));
            }
            if param.default.is_some() {
                return Err(CompileError::unsupported(format!(
                    "Rest parameter '{}' cannot have a default value",
                    param.name.name
                )));
            }
            continue;
        }
        match (&param.default, first_default) {
            (Some(_), None) => first_default = Some(i),
            (None, Some(_)) => {
                return Err(CompileError::unsupported(format!(
                    "Parameter '{}' without a default follows a defaulted parameter",
                    param.name.name
                )));
            }
            _ => {}
        }
    }
    let max = params.len();
    let min = first_default.unwrap_or(max);
    Ok((min, max))
}
