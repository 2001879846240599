use crate::error::Result;
use validator::Validate;

pub fn validate<T: Validate>(val: &T) -> Result<()> {
    val.validate()?;
    Ok(())
}

pub fn validate_all<'a, T: Validate + 'a>(vals: impl IntoIterator<Item = &'a T>) -> Result<()> {
    for val in vals {
        validate(val)?;
    }
    Ok(())
}
