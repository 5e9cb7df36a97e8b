use crate::server::response::ApiError;

const MAX_USERNAME_LEN: usize = 64;
const MAX_GROUP_NAME_LEN: usize = 64;
const MAX_PROJECT_NAME_LEN: usize = 100;

fn is_valid_name_char(c: char, allow_period: bool) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_' || (allow_period && c == '.')
}

fn validate_name(
    name: &str,
    entity: &str,
    max_len: usize,
    allow_period: bool,
    forbid_leading_special: bool,
) -> Result<(), String> {
    if name.is_empty() {
        return Err(format!("{entity} name cannot be empty"));
    }
    if name.len() > max_len {
        return Err(format!("{entity} name cannot exceed {max_len} characters"));
    }
    if !name.chars().all(|c| is_valid_name_char(c, allow_period)) {
        let mut allowed = "alphanumeric characters, hyphens, and underscores".to_string();
        if allow_period {
            allowed.push_str(", and periods");
        }
        return Err(format!("{entity} name can only contain {allowed}"));
    }
    if forbid_leading_special && (name.starts_with('-') || name.starts_with('_')) {
        return Err(format!(
            "{entity} name cannot start with a hyphen or underscore"
        ));
    }
    Ok(())
}

pub fn validate_username(name: &str) -> Result<(), String> {
    validate_name(name, "User", MAX_USERNAME_LEN, false, true)
}

pub fn validate_group_name(name: &str) -> Result<(), String> {
    validate_name(name, "Group", MAX_GROUP_NAME_LEN, false, true)
}

pub fn validate_project_name(name: &str) -> Result<(), ApiError> {
    validate_name(name, "Project", MAX_PROJECT_NAME_LEN, true, false)
        .map_err(ApiError::bad_request)
}

/// How a user is addressed in a lookup path: by username or by id.
pub enum LookupMethod {
    Name,
    Id,
}

impl LookupMethod {
    pub fn parse(raw: &str) -> Result<Self, ApiError> {
        match raw {
            "name" => Ok(Self::Name),
            "id" => Ok(Self::Id),
            other => Err(ApiError::unprocessable(format!(
                "Unknown lookup method '{other}', expected 'name' or 'id'"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_names_allow_periods() {
        assert!(validate_project_name("zope.interface").is_ok());
        assert!(validate_project_name("demo-pkg_2").is_ok());
    }

    #[test]
    fn test_project_name_rejects_separators() {
        assert!(validate_project_name("a/b").is_err());
        assert!(validate_project_name("").is_err());
    }

    #[test]
    fn test_username_rules() {
        assert!(validate_username("alice").is_ok());
        assert!(validate_username("_alice").is_err());
        assert!(validate_username("al.ice").is_err());
    }

    #[test]
    fn test_lookup_method_parse() {
        assert!(matches!(LookupMethod::parse("name"), Ok(LookupMethod::Name)));
        assert!(matches!(LookupMethod::parse("id"), Ok(LookupMethod::Id)));
        assert!(LookupMethod::parse("email").is_err());
    }
}
