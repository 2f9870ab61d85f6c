//! Pickle filter driver
//!
//! Walks the events of a pickle, offers each one to a transform, and
//! re-encodes the (possibly replaced) pair. Output order is input order;
//! the first failure aborts the whole run.

use super::argument::Argument;
use super::encoder::encode_into;
use super::opcode::Opcode;
use super::reader::{Event, OpReader};
use crate::error::{Error, Result};

/// Filter configuration
#[derive(Debug, Clone)]
pub struct FilterOptions {
    /// Treat the input as a record of concatenated pickles (ZODB data
    /// records hold a class pickle followed by a state pickle)
    pub record: bool,
    /// Inputs longer than this are rejected before decoding. Unlimited
    /// by default.
    pub max_input_size: usize,
}

impl Default for FilterOptions {
    fn default() -> Self {
        Self {
            record: false,
            max_input_size: usize::MAX,
        }
    }
}

/// Counters accumulated over every run of a [`PickleFilter`]
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FilterStats {
    pub pickles: usize,
    pub events: usize,
    pub substitutions: usize,
    pub bytes_in: usize,
    pub bytes_out: usize,
}

/// Pickle filter with running statistics
#[derive(Debug, Default)]
pub struct PickleFilter {
    options: FilterOptions,
    stats: FilterStats,
}

impl PickleFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: FilterOptions) -> Self {
        Self {
            options,
            stats: FilterStats::default(),
        }
    }

    pub fn options(&self) -> &FilterOptions {
        &self.options
    }

    pub fn stats(&self) -> &FilterStats {
        &self.stats
    }

    /// Filter `data`, returning the rewritten pickle (or record).
    ///
    /// `transform` is called exactly once per event, in stream order.
    /// Returning `None` keeps the event unchanged. A failed run leaves the
    /// stats as they were before the call.
    pub fn run<F>(&mut self, data: &[u8], mut transform: F) -> Result<Vec<u8>>
    where
        F: FnMut(Opcode, &Argument) -> Option<(Opcode, Argument)>,
    {
        if data.len() > self.options.max_input_size {
            return Err(Error::InputTooLarge {
                size: data.len(),
                limit: self.options.max_input_size,
            });
        }

        let start_stats = self.stats.clone();
        let mut out = Vec::with_capacity(data.len());

        let result = if self.options.record {
            self.run_record(data, &mut transform, &mut out)
        } else {
            self.run_events(OpReader::new(data), &mut transform, &mut out)
        };

        if let Err(err) = result {
            log::warn!("pickle filter aborted: {}", err);
            self.stats = start_stats;
            return Err(err);
        }

        self.stats.bytes_in += data.len();
        self.stats.bytes_out += out.len();
        log::debug!(
            "filtered {} pickle(s): {} events, {} substituted, {} -> {} bytes",
            self.stats.pickles - start_stats.pickles,
            self.stats.events - start_stats.events,
            self.stats.substitutions - start_stats.substitutions,
            data.len(),
            out.len()
        );
        Ok(out)
    }

    /// Filter events supplied by any decoder, appending to `out`.
    ///
    /// On error the stats are unchanged; `out` may hold a partial pickle.
    pub fn run_events<I, E, F>(&mut self, events: I, transform: &mut F, out: &mut Vec<u8>) -> Result<()>
    where
        I: IntoIterator<Item = std::result::Result<Event, E>>,
        E: Into<Error>,
        F: FnMut(Opcode, &Argument) -> Option<(Opcode, Argument)>,
    {
        let before = self.stats.clone();
        let result = self.feed(events, transform, out);
        if result.is_err() {
            self.stats = before;
        }
        result
    }

    fn feed<I, E, F>(&mut self, events: I, transform: &mut F, out: &mut Vec<u8>) -> Result<()>
    where
        I: IntoIterator<Item = std::result::Result<Event, E>>,
        E: Into<Error>,
        F: FnMut(Opcode, &Argument) -> Option<(Opcode, Argument)>,
    {
        for event in events {
            let event = event.map_err(Into::into)?;
            self.stats.events += 1;

            let replacement = transform(event.opcode, &event.arg);
            let (opcode, arg) = match &replacement {
                Some((opcode, arg)) => {
                    self.stats.substitutions += 1;
                    log::trace!(
                        "offset {}: {} {} -> {} {}",
                        event.offset,
                        event.opcode,
                        event.arg,
                        opcode,
                        arg
                    );
                    (*opcode, arg)
                }
                None => (event.opcode, &event.arg),
            };

            encode_into(out, opcode, arg).map_err(|source| Error::Encode {
                offset: event.offset,
                opcode,
                source,
            })?;
        }
        self.stats.pickles += 1;
        Ok(())
    }

    fn run_record<F>(&mut self, data: &[u8], transform: &mut F, out: &mut Vec<u8>) -> Result<()>
    where
        F: FnMut(Opcode, &Argument) -> Option<(Opcode, Argument)>,
    {
        let mut pos = 0;
        while pos < data.len() {
            let mut reader = OpReader::at(data, pos);
            self.run_events(&mut reader, transform, out)?;
            pos = reader.position();
        }
        Ok(())
    }

    /// True if filtering `data` without substitutions reproduces it exactly.
    pub fn is_identity(&mut self, data: &[u8]) -> Result<bool> {
        let out = self.run(data, |_, _| None)?;
        Ok(out == data)
    }
}

/// Filter a single pickle.
pub fn filter<F>(transform: F, data: &[u8]) -> Result<Vec<u8>>
where
    F: FnMut(Opcode, &Argument) -> Option<(Opcode, Argument)>,
{
    PickleFilter::new().run(data, transform)
}

/// Filter every pickle of a record, in order.
pub fn filter_record<F>(transform: F, data: &[u8]) -> Result<Vec<u8>>
where
    F: FnMut(Opcode, &Argument) -> Option<(Opcode, Argument)>,
{
    PickleFilter::with_options(FilterOptions {
        record: true,
        ..FilterOptions::default()
    })
    .run(data, transform)
}

/// Filter an already-decoded event sequence.
pub fn filter_events<I, E, F>(events: I, mut transform: F) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = std::result::Result<Event, E>>,
    E: Into<Error>,
    F: FnMut(Opcode, &Argument) -> Option<(Opcode, Argument)>,
{
    let mut out = Vec::new();
    PickleFilter::new().run_events(events, &mut transform, &mut out)?;
    Ok(out)
}
