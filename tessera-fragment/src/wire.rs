//! On-wire encoding of NDRanges, shared by the R-tree and the footer.
//!
//! Per dimension: fixed-size ranges are the raw `2 * coord_size` bytes;
//! var-size ranges are `u64 range_size, u64 start_size` followed by the
//! concatenated start and end byte strings.

use tessera_dtype::{NDRange, Range};
use tessera_error::TesseraResult;
use tessera_io::{Deserializer, Sink};
use tessera_schema::Domain;

pub(crate) fn write_ndrange<S: Sink + ?Sized>(sink: &mut S, domain: &Domain, ndrange: &NDRange) {
    for (dim, range) in domain.dimensions().iter().zip(ndrange) {
        if dim.var_size() {
            sink.write_u64(range.size());
            sink.write_u64(range.start_size());
            sink.write_bytes(range.data());
        } else {
            sink.write_bytes(range.data());
        }
    }
}

pub(crate) fn read_ndrange(de: &mut Deserializer<'_>, domain: &Domain) -> TesseraResult<NDRange> {
    let mut ndrange = Vec::with_capacity(domain.dim_num() as usize);
    for dim in domain.dimensions() {
        if dim.var_size() {
            let range_size = de.read_u64()?;
            let start_size = de.read_u64()?;
            let data = de.read_bytes(range_size)?;
            ndrange.push(Range::from_var_bytes(data, start_size)?);
        } else {
            let data = de.read_bytes(2 * dim.coord_size())?;
            ndrange.push(Range::from_fixed_bytes(data));
        }
    }
    Ok(ndrange)
}
